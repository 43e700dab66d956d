// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engagement Record Aggregate
//!
//! One record per recorded decision. Lifecycle:
//!
//! ```text
//! created ──► pending ──► scored ──► extracted
//!                │
//!                └──► expired (no response within the TTL) ──► extracted
//! ```
//!
//! Outcome fields are written exactly once. `learning_extracted` flips to
//! `true` at most once and is never reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::context::{EngagementContext, PsychologicalState, TriggerType};
use crate::domain::decision::{clamp_unit, EngagementDecision};
use crate::domain::intent::ExplicitRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngagementId(pub Uuid);

impl EngagementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngagementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngagementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    /// Awaiting a user response.
    Pending,
    /// Outcome analyzed, not yet mined.
    Scored,
    /// Closed without a response after the pending TTL.
    Expired,
    /// Contributed to pattern extraction.
    Extracted,
}

/// Outcome fields written once the user responds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementOutcome {
    pub responded_at: DateTime<Utc>,
    pub user_response_text: String,
    pub response_time_seconds: f64,
    pub sentiment: Sentiment,
    pub success_score: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngagementStateError {
    #[error("engagement {0} already has an outcome")]
    AlreadyScored(EngagementId),
    #[error("engagement {0} expired before a response arrived")]
    Expired(EngagementId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementRecord {
    pub id: EngagementId,
    pub session_id: String,
    pub user_id: String,
    pub personality_id: String,
    pub trigger_type: TriggerType,
    pub psychological_snapshot: Option<PsychologicalState>,
    pub decision_reasoning: String,
    pub proactive_content: String,
    pub scheduled_delay_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub user_response_text: Option<String>,
    pub response_time_seconds: Option<f64>,
    pub sentiment: Option<Sentiment>,
    pub success_score: Option<f64>,
    pub expired_at: Option<DateTime<Utc>>,
    pub learning_extracted: bool,
}

/// A turn in which the user asked to be contacted is recorded as an explicit request.
fn trigger_for(context: &EngagementContext) -> TriggerType {
    match context.trigger_type {
        TriggerType::ConversationTurn if ExplicitRequest::detect(&context.last_user_message).is_some() => {
            TriggerType::ExplicitRequest
        }
        other => other,
    }
}

impl EngagementRecord {
    /// Build a fresh pending record from a decision and its context.
    pub fn from_decision(decision: &EngagementDecision, context: &EngagementContext) -> Self {
        Self {
            id: EngagementId::new(),
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            personality_id: context.personality_id.clone(),
            trigger_type: trigger_for(context),
            psychological_snapshot: context.psychological_state.clone(),
            decision_reasoning: decision.reasoning.clone(),
            proactive_content: decision.message_content.clone().unwrap_or_default(),
            scheduled_delay_seconds: decision.delay_seconds().unwrap_or(0),
            created_at: Utc::now(),
            responded_at: None,
            user_response_text: None,
            response_time_seconds: None,
            sentiment: None,
            success_score: None,
            expired_at: None,
            learning_extracted: false,
        }
    }

    pub fn status(&self) -> EngagementStatus {
        if self.learning_extracted {
            EngagementStatus::Extracted
        } else if self.expired_at.is_some() {
            EngagementStatus::Expired
        } else if self.success_score.is_some() {
            EngagementStatus::Scored
        } else {
            EngagementStatus::Pending
        }
    }

    /// Whether the record can take part in pattern extraction.
    pub fn is_extractable(&self) -> bool {
        !self.learning_extracted && self.success_score.is_some()
    }

    /// Ensure an outcome may still be written.
    pub fn ensure_awaiting_outcome(&self) -> Result<(), EngagementStateError> {
        if self.expired_at.is_some() {
            return Err(EngagementStateError::Expired(self.id));
        }
        if self.success_score.is_some() {
            return Err(EngagementStateError::AlreadyScored(self.id));
        }
        Ok(())
    }

    pub fn apply_outcome(&mut self, outcome: &EngagementOutcome) -> Result<(), EngagementStateError> {
        self.ensure_awaiting_outcome()?;
        self.responded_at = Some(outcome.responded_at);
        self.user_response_text = Some(outcome.user_response_text.clone());
        self.response_time_seconds = Some(outcome.response_time_seconds);
        self.sentiment = Some(outcome.sentiment);
        self.success_score = Some(clamp_unit(outcome.success_score));
        Ok(())
    }

    /// Close a record that never received a response. Counts as a failure.
    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<(), EngagementStateError> {
        self.ensure_awaiting_outcome()?;
        self.expired_at = Some(at);
        self.success_score = Some(0.0);
        Ok(())
    }

    pub fn mark_extracted(&mut self) {
        self.learning_extracted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Timing;

    fn record() -> EngagementRecord {
        let decision = EngagementDecision {
            should_engage: true,
            timing: Timing::Wait2m,
            reasoning: "user went quiet".into(),
            message_content: Some("Still there?".into()),
            confidence: 0.7,
            context_analysis: Default::default(),
        };
        let ctx = EngagementContext::new("s1", "u1", "p1", "brb");
        EngagementRecord::from_decision(&decision, &ctx)
    }

    fn outcome(score: f64) -> EngagementOutcome {
        EngagementOutcome {
            responded_at: Utc::now(),
            user_response_text: "yes!".into(),
            response_time_seconds: 12.0,
            sentiment: Sentiment::Positive,
            success_score: score,
        }
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = record();
        assert_eq!(record.status(), EngagementStatus::Pending);
        assert_eq!(record.scheduled_delay_seconds, 120);
        assert_eq!(record.proactive_content, "Still there?");
        assert!(!record.is_extractable());
    }

    #[test]
    fn test_trigger_reflects_explicit_request() {
        assert_eq!(record().trigger_type, TriggerType::ConversationTurn);

        let decision = EngagementDecision {
            should_engage: true,
            timing: Timing::Wait5m,
            reasoning: "user asked for a reminder".into(),
            message_content: Some("Time to stretch!".into()),
            confidence: 0.9,
            context_analysis: Default::default(),
        };
        let asked = EngagementContext::new("s1", "u1", "p1", "Remind me in 5 minutes to stretch");
        assert_eq!(
            EngagementRecord::from_decision(&decision, &asked).trigger_type,
            TriggerType::ExplicitRequest
        );

        let mut manual = asked.clone();
        manual.trigger_type = TriggerType::Manual;
        assert_eq!(EngagementRecord::from_decision(&decision, &manual).trigger_type, TriggerType::Manual);
    }

    #[test]
    fn test_outcome_written_once() {
        let mut record = record();
        record.apply_outcome(&outcome(0.8)).unwrap();
        assert_eq!(record.status(), EngagementStatus::Scored);
        assert!(record.is_extractable());
        assert!(matches!(
            record.apply_outcome(&outcome(0.1)),
            Err(EngagementStateError::AlreadyScored(_))
        ));
        assert_eq!(record.success_score, Some(0.8));
    }

    #[test]
    fn test_outcome_score_clamped() {
        let mut record = record();
        record.apply_outcome(&outcome(1.7)).unwrap();
        assert_eq!(record.success_score, Some(1.0));
    }

    #[test]
    fn test_expired_record_rejects_outcome() {
        let mut record = record();
        record.expire(Utc::now()).unwrap();
        assert_eq!(record.status(), EngagementStatus::Expired);
        assert_eq!(record.success_score, Some(0.0));
        assert!(matches!(
            record.apply_outcome(&outcome(0.9)),
            Err(EngagementStateError::Expired(_))
        ));
    }

    #[test]
    fn test_extracted_is_terminal() {
        let mut record = record();
        record.apply_outcome(&outcome(0.9)).unwrap();
        record.mark_extracted();
        assert_eq!(record.status(), EngagementStatus::Extracted);
        assert!(!record.is_extractable());
    }
}
