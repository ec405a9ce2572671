//! Vector index client (Upstash Vector REST protocol).

use std::time::Duration;

use enricher_shared::{ApiConfig, EnricherError, NodeId, Result, VectorConfig};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::rest::{Credential, RestClient, RestConfig};

/// One stored vector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    #[serde(default)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Skill vectors keyed by node id, in a single namespace.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    rest: RestClient,
    namespace: String,
}

impl VectorIndex {
    pub fn new(rest: RestClient, namespace: impl Into<String>) -> Self {
        Self {
            rest,
            namespace: namespace.into(),
        }
    }

    pub fn rest_config(vector: &VectorConfig, api: &ApiConfig, token: String) -> RestConfig {
        RestConfig::new(vector.url.clone(), Credential::Bearer(token))
            .timeout(Duration::from_secs(api.timeout_secs))
            .max_retries(api.max_retries)
            .backoff(Duration::from_millis(api.backoff_ms))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Write (or overwrite) the vector for `id`.
    #[instrument(skip_all, fields(node_id = %id, dims = vector.len()))]
    pub async fn upsert(&self, id: &NodeId, vector: &[f32], metadata: Value) -> Result<()> {
        let path = format!("upsert/{}", self.namespace);
        let body = json!([{"id": id, "vector": vector, "metadata": metadata}]);
        self.rest.post(&path, &body).await?;
        debug!("vector upserted");
        Ok(())
    }

    /// Read the vector for `id`, if stored.
    #[instrument(skip_all, fields(node_id = %id))]
    pub async fn get(&self, id: &NodeId) -> Result<Option<VectorEntry>> {
        let path = format!("fetch/{}", self.namespace);
        let body = json!({"ids": [id], "includeVectors": true, "includeMetadata": true});
        let value = self.rest.post(&path, &body).await?;

        let first = value
            .get("result")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned()
            .unwrap_or(Value::Null);
        if first.is_null() {
            return Ok(None);
        }
        serde_json::from_value(first)
            .map(Some)
            .map_err(|e| EnricherError::parse(format!("{path}: malformed vector entry: {e}")))
    }
}
