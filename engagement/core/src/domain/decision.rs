// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engagement Decision (validation boundary)
//!
//! The oracle returns loosely-typed JSON. Nothing in the application layer
//! reads that JSON directly: [`EngagementDecision::from_oracle_value`] coerces
//! every field into a typed value and [`EngagementDecision::enforce_invariants`]
//! re-establishes the decision invariant:
//!
//! - `should_engage == false` ⇒ `timing == Timing::None` and no content
//! - `should_engage == true`  ⇒ non-empty content and `timing != Timing::None`
//!
//! Malformed or out-of-range fields are corrected, never rejected. Only a
//! payload that is not a JSON object at all is reported as unparsable, and
//! the caller degrades that to [`EngagementDecision::fallback`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::domain::intent::ExplicitRequest;

/// Content used when the oracle wants to engage but produced no message.
pub const DEFAULT_CHECK_IN_MESSAGE: &str = "Hey, just checking in. How are you doing?";

/// Reasoning attached to the fallback decision.
pub const FALLBACK_REASONING: &str = "fallback";

/// When a proactive message should go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "wait_30s")]
    Wait30s,
    #[serde(rename = "wait_2m")]
    Wait2m,
    #[serde(rename = "wait_5m")]
    Wait5m,
    #[serde(rename = "wait_later")]
    WaitLater,
    #[serde(rename = "none")]
    None,
}

impl Timing {
    pub const ALL: [Timing; 6] = [
        Timing::Immediate,
        Timing::Wait30s,
        Timing::Wait2m,
        Timing::Wait5m,
        Timing::WaitLater,
        Timing::None,
    ];

    /// Fixed timing → delay table. `None` means "skip, do not deliver".
    pub fn delay_seconds(self) -> Option<u64> {
        match self {
            Timing::Immediate => Some(0),
            Timing::Wait30s => Some(30),
            Timing::Wait2m => Some(120),
            Timing::Wait5m => Some(300),
            Timing::WaitLater => Some(600),
            Timing::None => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timing::Immediate => "immediate",
            Timing::Wait30s => "wait_30s",
            Timing::Wait2m => "wait_2m",
            Timing::Wait5m => "wait_5m",
            Timing::WaitLater => "wait_later",
            Timing::None => "none",
        }
    }

    /// Map free text to a canonical timing. Case-insensitive; anything
    /// unrecognized resolves to [`Timing::None`].
    pub fn parse_lenient(raw: &str) -> Timing {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "immediate" => Timing::Immediate,
            "wait_30s" => Timing::Wait30s,
            "wait_2m" => Timing::Wait2m,
            "wait_5m" => Timing::Wait5m,
            "wait_later" => Timing::WaitLater,
            "later today" | "tomorrow" | "later" => Timing::WaitLater,
            "soon" | "in a bit" => Timing::Wait5m,
            _ => Timing::None,
        }
    }

    /// Smallest canonical timing whose delay is at least `seconds`,
    /// capped at [`Timing::WaitLater`].
    pub fn covering(seconds: u64) -> Timing {
        match seconds {
            0 => Timing::Immediate,
            1..=30 => Timing::Wait30s,
            31..=120 => Timing::Wait2m,
            121..=300 => Timing::Wait5m,
            _ => Timing::WaitLater,
        }
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one decision evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementDecision {
    pub should_engage: bool,
    pub timing: Timing,
    pub reasoning: String,
    pub message_content: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub context_analysis: Map<String, Value>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("oracle payload is not a JSON object")]
    NotAnObject,
}

impl EngagementDecision {
    /// The fixed decision returned whenever the oracle cannot be trusted.
    pub fn fallback() -> Self {
        Self {
            should_engage: false,
            timing: Timing::None,
            reasoning: FALLBACK_REASONING.to_string(),
            message_content: None,
            confidence: 0.0,
            context_analysis: Map::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        !self.should_engage && self.reasoning == FALLBACK_REASONING && self.confidence == 0.0
    }

    /// Coerce a raw oracle payload into a normalized decision.
    pub fn from_oracle_value(value: &Value) -> Result<Self, DecisionParseError> {
        let object = value.as_object().ok_or(DecisionParseError::NotAnObject)?;

        let should_engage = object
            .get("shouldEngage")
            .or_else(|| object.get("should_engage"))
            .map(coerce_bool)
            .unwrap_or(false);

        let timing = object
            .get("timing")
            .and_then(Value::as_str)
            .map(Timing::parse_lenient)
            .unwrap_or(Timing::None);

        let reasoning = object
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        let message_content = object
            .get("messageContent")
            .or_else(|| object.get("message_content"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let confidence = object
            .get("confidence")
            .and_then(coerce_f64)
            .map(clamp_unit)
            .unwrap_or(0.0);

        let context_analysis = object
            .get("contextAnalysis")
            .or_else(|| object.get("context_analysis"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut decision = Self {
            should_engage,
            timing,
            reasoning,
            message_content,
            confidence,
            context_analysis,
        };
        decision.enforce_invariants();
        Ok(decision)
    }

    /// Re-establish the engage/timing/content invariant after any mutation.
    pub fn enforce_invariants(&mut self) {
        self.confidence = clamp_unit(self.confidence);

        if self.should_engage {
            if self.timing == Timing::None {
                self.timing = Timing::Immediate;
            }
            let empty = self
                .message_content
                .as_deref()
                .map(|c| c.trim().is_empty())
                .unwrap_or(true);
            if empty {
                self.message_content = Some(DEFAULT_CHECK_IN_MESSAGE.to_string());
            }
        } else {
            self.timing = Timing::None;
            self.message_content = None;
        }
    }

    /// Honour a user's explicit request for a future message, overriding a
    /// refusal or a timing shorter than what the user asked for.
    pub fn apply_explicit_request(&mut self, request: &ExplicitRequest) {
        let requested = request.timing();

        if !self.should_engage {
            self.should_engage = true;
            self.timing = requested;
            self.reasoning = if self.reasoning.is_empty() {
                format!("user explicitly asked for a message ({})", request.phrase)
            } else {
                format!(
                    "{} | overridden: user explicitly asked for a message ({})",
                    self.reasoning, request.phrase
                )
            };
        } else if request.requested_delay_seconds.is_some() {
            let current = self.timing.delay_seconds().unwrap_or(0);
            let wanted = requested.delay_seconds().unwrap_or(0);
            if current < wanted {
                self.timing = requested;
            }
        }

        self.context_analysis.insert(
            "explicitRequest".to_string(),
            Value::String(request.phrase.clone()),
        );
        self.enforce_invariants();
    }

    /// Delay implied by the timing; `None` when the decision is a skip.
    pub fn delay_seconds(&self) -> Option<u64> {
        self.timing.delay_seconds()
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Clamp into `[0, 1]`; NaN collapses to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
