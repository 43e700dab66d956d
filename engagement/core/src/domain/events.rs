// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the engagement subsystem
//! Published to the EventBus for observability and integration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::connection::ConnectionId;
use crate::domain::decision::Timing;
use crate::domain::delivery::{MessageId, ScheduleId};
use crate::domain::engagement::{EngagementId, Sentiment};
use crate::domain::pattern::{PatternId, PatternType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngagementEvent {
    // Decision events

    /// A decision was produced (fallback included)
    DecisionEvaluated {
        session_id: String,
        should_engage: bool,
        timing: Timing,
        confidence: f64,
        fallback: bool,
        timestamp: DateTime<Utc>,
    },

    /// A decision was persisted as an engagement record
    EngagementRecorded {
        engagement_id: EngagementId,
        session_id: String,
        personality_id: String,
        timestamp: DateTime<Utc>,
    },

    // Delivery events

    MessageDelivered {
        engagement_id: EngagementId,
        message_id: MessageId,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The user was offline; the message was persisted as pending
    MessageQueuedOffline {
        engagement_id: EngagementId,
        message_id: MessageId,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    DeliveryScheduled {
        schedule_id: ScheduleId,
        engagement_id: EngagementId,
        delay_seconds: u64,
        timestamp: DateTime<Utc>,
    },

    ScheduleCancelled {
        schedule_id: ScheduleId,
        timestamp: DateTime<Utc>,
    },

    // Learning events

    OutcomeScored {
        engagement_id: EngagementId,
        sentiment: Sentiment,
        success_score: f64,
        timestamp: DateTime<Utc>,
    },

    PatternExtracted {
        pattern_id: PatternId,
        personality_id: String,
        pattern_type: PatternType,
        confidence: f64,
        sample_size: u32,
        timestamp: DateTime<Utc>,
    },

    /// A record was closed without a response
    PendingExpired {
        engagement_id: EngagementId,
        timestamp: DateTime<Utc>,
    },

    // Connection events

    ConnectionRegistered {
        user_id: String,
        connection_id: ConnectionId,
        timestamp: DateTime<Utc>,
    },

    /// An existing connection was closed to make room for a new one
    ConnectionReplaced {
        user_id: String,
        old_connection_id: ConnectionId,
        new_connection_id: ConnectionId,
        timestamp: DateTime<Utc>,
    },

    ConnectionClosed {
        user_id: String,
        connection_id: ConnectionId,
        timestamp: DateTime<Utc>,
    },
}

impl EngagementEvent {
    /// Get event type as string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            EngagementEvent::DecisionEvaluated { .. } => "decision_evaluated",
            EngagementEvent::EngagementRecorded { .. } => "engagement_recorded",
            EngagementEvent::MessageDelivered { .. } => "message_delivered",
            EngagementEvent::MessageQueuedOffline { .. } => "message_queued_offline",
            EngagementEvent::DeliveryScheduled { .. } => "delivery_scheduled",
            EngagementEvent::ScheduleCancelled { .. } => "schedule_cancelled",
            EngagementEvent::OutcomeScored { .. } => "outcome_scored",
            EngagementEvent::PatternExtracted { .. } => "pattern_extracted",
            EngagementEvent::PendingExpired { .. } => "pending_expired",
            EngagementEvent::ConnectionRegistered { .. } => "connection_registered",
            EngagementEvent::ConnectionReplaced { .. } => "connection_replaced",
            EngagementEvent::ConnectionClosed { .. } => "connection_closed",
        }
    }
}
