// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Timing,
    Content,
    Context,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Timing => "timing",
            PatternType::Content => "content",
            PatternType::Context => "context",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "timing" => Some(PatternType::Timing),
            "content" => Some(PatternType::Content),
            "context" => Some(PatternType::Context),
            _ => None,
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mined generalization about what works for a persona.
///
/// Immutable once written; the decision engine reads it, nothing updates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedPattern {
    pub id: PatternId,
    pub personality_id: String,
    pub pattern_type: PatternType,
    pub pattern_context: Map<String, Value>,
    pub pattern_data: Map<String, Value>,
    pub confidence_score: f64,
    pub sample_size: u32,
    pub created_at: DateTime<Utc>,
}

impl LearnedPattern {
    pub fn new(
        personality_id: impl Into<String>,
        pattern_type: PatternType,
        pattern_context: Map<String, Value>,
        pattern_data: Map<String, Value>,
        confidence_score: f64,
        sample_size: u32,
    ) -> Self {
        Self {
            id: PatternId::new(),
            personality_id: personality_id.into(),
            pattern_type,
            pattern_context,
            pattern_data,
            confidence_score,
            sample_size,
            created_at: Utc::now(),
        }
    }

    /// One-line summary used when embedding the pattern into an oracle prompt.
    pub fn summary(&self) -> String {
        format!(
            "[{} pattern, confidence {:.2}, n={}] {}",
            self.pattern_type,
            self.confidence_score,
            self.sample_size,
            Value::Object(self.pattern_data.clone())
        )
    }
}
