// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Oracle Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between the domain `Oracle` contract and one
// external text-generation API.

pub mod ollama;
pub mod openai;

use std::sync::Arc;

use crate::domain::config::OracleConfig;
use crate::domain::oracle::Oracle;

pub use ollama::OllamaOracle;
pub use openai::OpenAIOracle;

/// Build the configured oracle adapter
pub fn oracle_from_config(config: &OracleConfig) -> anyhow::Result<Arc<dyn Oracle>> {
    let oracle: Arc<dyn Oracle> = match config.provider_type.as_str() {
        "openai" | "openai-compatible" => {
            // Local OpenAI-compatible servers run without auth
            let api_key = config.resolve_api_key()?.unwrap_or_default();
            Arc::new(OpenAIOracle::new(
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
            ))
        }
        "ollama" => Arc::new(OllamaOracle::new(config.endpoint.clone(), config.model.clone())),
        other => anyhow::bail!("Unsupported oracle type: {}", other),
    };

    tracing::info!(
        provider = %config.provider_type,
        model = %config.model,
        "Oracle adapter initialized"
    );
    Ok(oracle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = OracleConfig {
            provider_type: "telepathy".into(),
            ..Default::default()
        };
        assert!(oracle_from_config(&config).is_err());
    }

    #[test]
    fn test_factory_builds_default_provider() {
        assert!(oracle_from_config(&OracleConfig::default()).is_ok());
    }
}
