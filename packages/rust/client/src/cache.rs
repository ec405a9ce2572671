//! Shared embedding cache over the Upstash Redis REST protocol.
//!
//! Commands are posted as JSON arrays (`["GET", key]`) and answered with
//! `{"result": ...}`. Vectors are stored as JSON-encoded strings.

use std::time::Duration;

use enricher_shared::{ApiConfig, CacheConfig, EnricherError, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::rest::{Credential, RestClient, RestConfig};

#[derive(Debug, Clone)]
pub struct RedisCache {
    rest: RestClient,
}

impl RedisCache {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub fn rest_config(cache: &CacheConfig, api: &ApiConfig, token: String) -> RestConfig {
        RestConfig::new(cache.url.clone(), Credential::Bearer(token))
            .timeout(Duration::from_secs(api.timeout_secs))
            .max_retries(api.max_retries)
            .backoff(Duration::from_millis(api.backoff_ms))
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_vector(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let value = self.rest.post("", &json!(["GET", key])).await?;
        let Some(raw) = value.get("result").and_then(Value::as_str) else {
            debug!("cache miss");
            return Ok(None);
        };
        let vector = serde_json::from_str(raw)
            .map_err(|e| EnricherError::parse(format!("cached vector for {key}: {e}")))?;
        debug!("cache hit");
        Ok(Some(vector))
    }

    #[instrument(skip_all, fields(key = %key, dims = vector.len()))]
    pub async fn set_vector(&self, key: &str, vector: &[f32]) -> Result<()> {
        let encoded = serde_json::to_string(vector)
            .map_err(|e| EnricherError::parse(format!("failed to encode vector: {e}")))?;
        self.rest.post("", &json!(["SET", key, encoded])).await?;
        Ok(())
    }
}
