// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Oracle
//!
//! Provides the oracle contract for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-corruption boundary around the external text-generation service

// Oracle Domain Interface (Anti-Corruption Layer)
//
// The oracle is a non-deterministic reasoning source: it receives a prompt
// plus a JSON schema and answers with a JSON object that *should* match the
// schema. Callers never trust the shape; see domain::decision for the
// validation boundary.
//
// Implementations in infrastructure/oracle/ directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Domain interface for structured text generation
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Generate a JSON object constrained by `schema`
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        options: &OracleOptions,
    ) -> Result<Value, OracleError>;

    /// Check if the oracle is reachable
    async fn health_check(&self) -> Result<(), OracleError>;
}

/// Options for one oracle call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleOptions {
    /// Sampling temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Upper bound on the whole call, enforced by the caller
    pub timeout_ms: u64,
}

impl OracleOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            timeout_ms: 5_000,
        }
    }
}

/// Errors that can occur during oracle calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Oracle call timed out after {0} ms")]
    Timeout(u64),

    #[error("Unparsable oracle output: {0}")]
    Unparsable(String),
}

/// Run an oracle call under the upper time bound carried by `options`.
pub async fn generate_with_timeout(
    oracle: &dyn Oracle,
    prompt: &str,
    schema: &Value,
    options: &OracleOptions,
) -> Result<Value, OracleError> {
    match tokio::time::timeout(options.timeout(), oracle.generate_structured(prompt, schema, options)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(options.timeout_ms)),
    }
}

/// Extract a JSON object from raw model text, tolerating markdown fences and
/// leading/trailing prose.
pub fn parse_json_object(text: &str) -> Result<Value, OracleError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    // Fall back to the outermost braces
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<Value>(&unfenced[start..=end])
                .ok()
                .filter(Value::is_object)
                .ok_or_else(|| OracleError::Unparsable(truncate(unfenced)))
        }
        _ => Err(OracleError::Unparsable(truncate(unfenced))),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowOracle;

    #[async_trait]
    impl Oracle for SlowOracle {
        async fn generate_structured(
            &self,
            _prompt: &str,
            _schema: &Value,
            _options: &OracleOptions,
        ) -> Result<Value, OracleError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }

        async fn health_check(&self) -> Result<(), OracleError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_enforced() {
        let options = OracleOptions {
            timeout_ms: 5_000,
            ..Default::default()
        };
        let result = generate_with_timeout(&SlowOracle, "p", &json!({}), &options).await;
        assert!(matches!(result, Err(OracleError::Timeout(5_000))));
    }

    #[test]
    fn test_parse_plain_object() {
        let value = parse_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_fenced_object() {
        let value = parse_json_object("```json\n{\"shouldEngage\": true}\n```").unwrap();
        assert_eq!(value["shouldEngage"], true);
    }

    #[test]
    fn test_parse_object_with_prose() {
        let value = parse_json_object("Sure! Here it is: {\"score\": 0.4} hope that helps").unwrap();
        assert_eq!(value["score"], 0.4);
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(matches!(parse_json_object("[1, 2]"), Err(OracleError::Unparsable(_))));
        assert!(matches!(parse_json_object("no json here"), Err(OracleError::Unparsable(_))));
    }
}
