// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engagement Context
//!
//! Input to a decision evaluation: the latest exchange, the persona's static
//! framework, the user's current psychological state and a bounded slice of
//! conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of conversation turns passed to the oracle.
pub const HISTORY_WINDOW: usize = 5;

/// Snapshot of the user's inferred psychological state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsychologicalState {
    /// Dominant emotion label, e.g. "anxious", "content".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,

    /// Energy on a 1-10 scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<f64>,

    #[serde(default)]
    pub motivations: Vec<String>,

    /// Any additional signals the upstream analyser produced.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub signals: Map<String, Value>,
}

impl PsychologicalState {
    /// Whether the snapshot carries any of the structured fields the
    /// context extractor can learn from.
    pub fn is_structured(&self) -> bool {
        self.emotion.as_deref().map(|e| !e.trim().is_empty()).unwrap_or(false)
            || self.energy_level.is_some()
            || !self.motivations.is_empty()
    }
}

/// Static description of the simulated persona.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaFramework {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_style: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// What prompted the system to consider an unsolicited message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    ConversationTurn,
    ExplicitRequest,
    Inactivity,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::ConversationTurn => "conversation_turn",
            TriggerType::ExplicitRequest => "explicit_request",
            TriggerType::Inactivity => "inactivity",
            TriggerType::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "explicit_request" => TriggerType::ExplicitRequest,
            "inactivity" => TriggerType::Inactivity,
            "manual" => TriggerType::Manual,
            _ => TriggerType::ConversationTurn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementContext {
    pub session_id: String,
    pub user_id: String,
    pub personality_id: String,
    pub last_user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psychological_state: Option<PsychologicalState>,
    #[serde(default)]
    pub persona: PersonaFramework,
    #[serde(default)]
    pub recent_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EngagementContext {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        personality_id: impl Into<String>,
        last_user_message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            personality_id: personality_id.into(),
            last_user_message: last_user_message.into(),
            last_agent_reply: None,
            psychological_state: None,
            persona: PersonaFramework::default(),
            recent_history: Vec::new(),
            trigger_type: TriggerType::default(),
            metadata: Map::new(),
        }
    }

    pub fn with_psychological_state(mut self, state: PsychologicalState) -> Self {
        self.psychological_state = Some(state);
        self
    }

    pub fn with_persona(mut self, persona: PersonaFramework) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.recent_history = history;
        self
    }

    /// The most recent [`HISTORY_WINDOW`] turns.
    pub fn bounded_history(&self) -> &[ConversationTurn] {
        let start = self.recent_history.len().saturating_sub(HISTORY_WINDOW);
        &self.recent_history[start..]
    }
}
