//! Embedding provider client (Jina-compatible `embeddings` endpoint).

use std::time::Duration;

use enricher_shared::{ApiConfig, EmbeddingConfig, EnricherError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::rest::{Credential, RestClient, RestConfig};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    task: &'static str,
    dimensions: usize,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    rest: RestClient,
    model: String,
    dimensions: usize,
}

impl EmbeddingClient {
    pub fn new(rest: RestClient, config: &EmbeddingConfig) -> Self {
        Self {
            rest,
            model: config.model.clone(),
            dimensions: config.dimensions,
        }
    }

    pub fn rest_config(config: &EmbeddingConfig, api: &ApiConfig, api_key: String) -> RestConfig {
        RestConfig::new(config.base_url.clone(), Credential::Bearer(api_key))
            .timeout(Duration::from_secs(api.timeout_secs))
            .max_retries(api.max_retries)
            .backoff(Duration::from_millis(api.backoff_ms))
    }

    /// Embed one text; the result must have the configured width.
    #[instrument(skip_all, fields(model = %self.model, chars = text.len()))]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            task: "text-matching",
            dimensions: self.dimensions,
            input: [text],
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| EnricherError::Embedding(format!("failed to encode request: {e}")))?;
        let value = self
            .rest
            .post("embeddings", &body)
            .await
            .map_err(|e| EnricherError::Embedding(e.to_string()))?;

        let parsed: EmbeddingResponse = serde_json::from_value(value)
            .map_err(|e| EnricherError::Embedding(format!("unexpected response shape: {e}")))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EnricherError::Embedding("provider returned no embedding".into()))?;

        if vector.len() != self.dimensions {
            return Err(EnricherError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        debug!(dims = vector.len(), "embedding computed");
        Ok(vector)
    }
}
