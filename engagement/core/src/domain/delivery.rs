// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Delivery
//!
//! Value objects shared by the delivery scheduler and the connection
//! registry: the wire payload pushed to a client, the persisted conversation
//! message, and the structured outcome of a delivery attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::engagement::EngagementId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the scheduler hands to the registry for one proactive message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub session_id: String,
    pub user_id: String,
    pub engagement_id: EngagementId,
    pub content: String,
}

/// Frame pushed to a connected client as UTF-8 JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactivePayload {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub engagement_id: EngagementId,
    pub timestamp: DateTime<Utc>,
}

impl ProactivePayload {
    pub const KIND: &'static str = "proactive";

    pub fn new(content: impl Into<String>, engagement_id: EngagementId) -> Self {
        Self {
            id: MessageId::new(),
            kind: Self::KIND.to_string(),
            content: content.into(),
            engagement_id,
            timestamp: Utc::now(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Assistant,
}

/// Immutable conversation log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: MessageId,
    pub session_id: String,
    pub user_id: String,
    pub sender: MessageSender,
    pub content: String,
    pub proactive: bool,
    /// `false` for messages persisted while the user was offline.
    pub delivered: bool,
    pub engagement_id: Option<EngagementId>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn proactive(request: &DeliveryRequest, id: MessageId, delivered: bool) -> Self {
        Self {
            id,
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            sender: MessageSender::Assistant,
            content: request.content.clone(),
            proactive: true,
            delivered,
            engagement_id: Some(request.engagement_id),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeliveredReason {
    UserOffline,
}

impl UndeliveredReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UndeliveredReason::UserOffline => "user_offline",
        }
    }
}

/// Result of `process_decision`. Offline delivery is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        #[serde(rename = "engagementId")]
        engagement_id: EngagementId,
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
    Undelivered {
        #[serde(rename = "engagementId")]
        engagement_id: EngagementId,
        reason: UndeliveredReason,
        /// Id of the persisted pending message.
        #[serde(rename = "pendingMessageId")]
        pending_message_id: MessageId,
    },
    Scheduled {
        #[serde(rename = "engagementId")]
        engagement_id: EngagementId,
        #[serde(rename = "scheduleId")]
        schedule_id: ScheduleId,
        #[serde(rename = "delaySeconds")]
        delay_seconds: u64,
    },
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn engagement_id(&self) -> EngagementId {
        match self {
            DeliveryOutcome::Delivered { engagement_id, .. }
            | DeliveryOutcome::Undelivered { engagement_id, .. }
            | DeliveryOutcome::Scheduled { engagement_id, .. } => *engagement_id,
        }
    }

    pub fn reason(&self) -> Option<UndeliveredReason> {
        match self {
            DeliveryOutcome::Undelivered { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// `getAnalytics` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub active_connections: usize,
    pub pending_schedules: usize,
}
