// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Decision Engine
//!
//! Asks the oracle whether a persona should reach out unprompted, when, and
//! with what message.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Collaborators:**
//!   - Domain: `EngagementContext`, `EngagementDecision`, `ExplicitRequest`, `LearnedPattern`
//!   - Infrastructure: `Oracle`, `EventBus`
//!
//! # Flow
//!
//! 1. Detect an explicit request for a future message in the last user message
//! 2. Build the prompt: persona, psychological state, last five turns, top patterns
//! 3. Call the oracle under the decision timeout with the decision schema
//! 4. Normalize the answer through `EngagementDecision::from_oracle_value`
//! 5. Honour the explicit request when the oracle declined or picked a shorter wait
//! 6. Publish `DecisionEvaluated`
//!
//! # Error Handling
//!
//! `evaluate` never fails. Timeouts, transport errors and unparsable payloads
//! all return `EngagementDecision::fallback()`.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::context::{EngagementContext, TurnRole};
use crate::domain::decision::{EngagementDecision, Timing};
use crate::domain::events::EngagementEvent;
use crate::domain::intent::ExplicitRequest;
use crate::domain::oracle::{generate_with_timeout, Oracle, OracleOptions};
use crate::domain::pattern::LearnedPattern;
use crate::infrastructure::event_bus::EventBus;

/// Patterns embedded in a single decision prompt
pub const DEFAULT_PATTERN_LIMIT: usize = 3;

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Decide whether to engage. `patterns` are the persona's learned
    /// patterns, highest confidence first.
    async fn evaluate(&self, context: &EngagementContext, patterns: &[LearnedPattern]) -> EngagementDecision;
}

pub struct StandardDecisionEngine {
    oracle: Arc<dyn Oracle>,
    options: OracleOptions,
    pattern_limit: usize,
    event_bus: EventBus,
}

impl StandardDecisionEngine {
    pub fn new(oracle: Arc<dyn Oracle>, options: OracleOptions, event_bus: EventBus) -> Self {
        Self {
            oracle,
            options,
            pattern_limit: DEFAULT_PATTERN_LIMIT,
            event_bus,
        }
    }

    pub fn with_pattern_limit(mut self, limit: usize) -> Self {
        self.pattern_limit = limit;
        self
    }

    /// JSON schema the oracle answer must follow.
    pub fn decision_schema() -> Value {
        let timings: Vec<&str> = Timing::ALL.iter().map(|t| t.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "shouldEngage": { "type": "boolean" },
                "timing": { "type": "string", "enum": timings },
                "reasoning": { "type": "string" },
                "messageContent": { "type": ["string", "null"] },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "contextAnalysis": { "type": "object" }
            },
            "required": ["shouldEngage", "timing", "reasoning", "messageContent", "confidence"]
        })
    }

    fn build_prompt(
        &self,
        context: &EngagementContext,
        patterns: &[LearnedPattern],
        explicit: Option<&ExplicitRequest>,
    ) -> String {
        let mut prompt = String::new();
        let persona = &context.persona;

        let _ = writeln!(
            prompt,
            "You are deciding whether {} should send an unsolicited follow-up message to the user.",
            if persona.name.is_empty() { "the persona" } else { persona.name.as_str() }
        );

        if !persona.description.is_empty() || !persona.traits.is_empty() {
            let _ = writeln!(prompt, "\nPersona framework:");
            if !persona.description.is_empty() {
                let _ = writeln!(prompt, "- Description: {}", persona.description);
            }
            if !persona.traits.is_empty() {
                let _ = writeln!(prompt, "- Traits: {}", persona.traits.join(", "));
            }
            if let Some(style) = &persona.communication_style {
                let _ = writeln!(prompt, "- Communication style: {}", style);
            }
        }

        if let Some(state) = &context.psychological_state {
            let _ = writeln!(prompt, "\nCurrent psychological state of the user:");
            if let Some(emotion) = &state.emotion {
                let _ = writeln!(prompt, "- Emotion: {}", emotion);
            }
            if let Some(energy) = state.energy_level {
                let _ = writeln!(prompt, "- Energy level: {:.1}", energy);
            }
            if !state.motivations.is_empty() {
                let _ = writeln!(prompt, "- Motivations: {}", state.motivations.join(", "));
            }
            if !state.signals.is_empty() {
                let _ = writeln!(prompt, "- Signals: {}", Value::Object(state.signals.clone()));
            }
        }

        let history = context.bounded_history();
        if !history.is_empty() {
            let _ = writeln!(prompt, "\nRecent conversation (oldest first):");
            for turn in history {
                let speaker = match turn.role {
                    TurnRole::User => "User",
                    TurnRole::Assistant => "Persona",
                };
                let _ = writeln!(prompt, "{}: {}", speaker, turn.content);
            }
        }

        let _ = writeln!(prompt, "\nLast user message: {}", context.last_user_message);
        if let Some(reply) = &context.last_agent_reply {
            let _ = writeln!(prompt, "Last persona reply: {}", reply);
        }

        let top: Vec<&LearnedPattern> = patterns.iter().take(self.pattern_limit).collect();
        if !top.is_empty() {
            let _ = writeln!(prompt, "\nWhat has worked before for this persona:");
            for pattern in top {
                let _ = writeln!(prompt, "- {}", pattern.summary());
            }
        }

        if !context.metadata.is_empty() {
            let _ = writeln!(prompt, "\nSession metadata: {}", Value::Object(context.metadata.clone()));
        }

        let _ = writeln!(
            prompt,
            "\nRules:\n\
             - If the user explicitly asked for a future message (\"send me a message\", \"remind me\", \"in N minutes\"), shouldEngage MUST be true regardless of their emotional state.\n\
             - timing is one of: immediate, wait_30s, wait_2m, wait_5m, wait_later, none.\n\
             - When shouldEngage is false, timing is none and messageContent is null.\n\
             - When shouldEngage is true, messageContent is the message the persona sends, in its own voice."
        );
        if let Some(request) = explicit {
            let _ = writeln!(prompt, "- The user just made such a request: \"{}\".", request.phrase);
        }

        prompt
    }

    fn record_metrics(decision: &EngagementDecision) {
        let result = if decision.is_fallback() {
            "fallback"
        } else if decision.should_engage {
            "engage"
        } else {
            "skip"
        };
        counter!("kindred_decisions_total", "result" => result).increment(1);
    }
}

#[async_trait]
impl DecisionEngine for StandardDecisionEngine {
    async fn evaluate(&self, context: &EngagementContext, patterns: &[LearnedPattern]) -> EngagementDecision {
        let explicit = ExplicitRequest::detect(&context.last_user_message);
        let prompt = self.build_prompt(context, patterns, explicit.as_ref());
        let schema = Self::decision_schema();

        let decision = match generate_with_timeout(self.oracle.as_ref(), &prompt, &schema, &self.options).await {
            Ok(value) => match EngagementDecision::from_oracle_value(&value) {
                Ok(mut decision) => {
                    if let Some(request) = &explicit {
                        decision.apply_explicit_request(request);
                    }
                    decision
                }
                Err(e) => {
                    warn!(session_id = %context.session_id, error = %e, "Oracle decision unusable, falling back");
                    EngagementDecision::fallback()
                }
            },
            Err(e) => {
                warn!(session_id = %context.session_id, error = %e, "Oracle decision call failed, falling back");
                EngagementDecision::fallback()
            }
        };

        debug!(
            session_id = %context.session_id,
            should_engage = decision.should_engage,
            timing = %decision.timing,
            confidence = decision.confidence,
            "Engagement decision evaluated"
        );
        Self::record_metrics(&decision);
        self.event_bus.publish(EngagementEvent::DecisionEvaluated {
            session_id: context.session_id.clone(),
            should_engage: decision.should_engage,
            timing: decision.timing,
            confidence: decision.confidence,
            fallback: decision.is_fallback(),
            timestamp: Utc::now(),
        });

        decision
    }
}
