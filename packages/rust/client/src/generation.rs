//! Chat-completion client for description generation.
//!
//! Speaks the OpenAI-compatible `chat/completions` protocol (OpenRouter by
//! default). Each call is a single attempt: a failed generation fails the run.

use std::time::Duration;

use enricher_shared::{EnricherError, GenerationConfig, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::rest::{Credential, RestClient, RestConfig};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Generation provider client.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    rest: RestClient,
    model: String,
}

impl GenerationClient {
    pub fn new(rest: RestClient, model: impl Into<String>) -> Self {
        Self {
            rest,
            model: model.into(),
        }
    }

    pub fn rest_config(config: &GenerationConfig, api_key: String) -> RestConfig {
        RestConfig::new(config.base_url.clone(), Credential::Bearer(api_key))
            .timeout(Duration::from_secs(config.timeout_secs))
            .single_attempt()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask for a JSON object answer and return the raw message content.
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = user.len()))]
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| EnricherError::Generation(format!("failed to encode request: {e}")))?;

        let value: Value = self
            .rest
            .post("chat/completions", &body)
            .await
            .map_err(|e| EnricherError::Generation(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_value(value)
            .map_err(|e| EnricherError::Generation(format!("unexpected response shape: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EnricherError::Generation("provider returned no content".into()))?;
        debug!(chars = content.len(), "generation completed");
        Ok(content)
    }
}
