// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// OpenAI Oracle Adapter
//
// Anti-Corruption Layer for the OpenAI chat completions API.
// Also works with OpenAI-compatible APIs (LM Studio, vLLM, etc.)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::oracle::{parse_json_object, Oracle, OracleError, OracleOptions};

pub struct OpenAIOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: Value,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAIOracle {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Oracle for OpenAIOracle {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        options: &OracleOptions,
    ) -> Result<Value, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "Respond only with a JSON object matching the provided schema.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema }
            }),
        };

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => OracleError::Authentication(error_text),
                429 => OracleError::RateLimit,
                404 => OracleError::ModelNotFound(self.model.clone()),
                400 => OracleError::InvalidInput(error_text),
                _ => OracleError::Provider(format!("HTTP {}: {}", status, error_text)),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Provider(format!("Failed to parse response: {}", e)))?;

        let choice = chat
            .choices
            .first()
            .ok_or_else(|| OracleError::Provider("No response from model".into()))?;

        parse_json_object(&choice.message.content)
    }

    async fn health_check(&self) -> Result<(), OracleError> {
        let response = self
            .client
            .get(self.url("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == 401 || response.status() == 403 {
            Err(OracleError::Authentication("Invalid API key".into()))
        } else {
            Err(OracleError::Network(format!("HTTP {}", response.status())))
        }
    }
}
