// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ollama Oracle Adapter
//
// Anti-Corruption Layer for local Ollama models. Structured output is
// requested through the `format` field, which accepts a JSON schema.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::oracle::{parse_json_object, Oracle, OracleError, OracleOptions};

pub struct OllamaOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a Value,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaOracle {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        options: &OracleOptions,
    ) -> Result<Value, OracleError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: schema,
            options: GenerateOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens as i32,
            },
        };

        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 404 {
                OracleError::ModelNotFound(self.model.clone())
            } else {
                OracleError::Provider(format!("HTTP {}: {}", status, error_text))
            });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Provider(format!("Failed to parse response: {}", e)))?;

        parse_json_object(&generated.response)
    }

    async fn health_check(&self) -> Result<(), OracleError> {
        // Listing models proves the server is up
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(OracleError::Network(format!("HTTP {}", response.status())))
        }
    }
}
