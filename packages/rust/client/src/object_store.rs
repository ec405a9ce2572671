//! Read-only access to the bucket holding raw profile HTML.

use std::io::Read;
use std::time::Duration;

use enricher_shared::{ApiConfig, EnricherError, Result, StorageConfig};
use flate2::read::GzDecoder;
use reqwest::Method;
use tracing::{debug, instrument};

use crate::rest::{Credential, RestClient, RestConfig};

/// Bucket reader over an HTTP gateway: `GET {endpoint}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    rest: RestClient,
}

impl ObjectStore {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// REST settings for the bucket; retry policy follows the API section.
    ///
    /// Without a token the gateway is called anonymously.
    pub fn rest_config(
        storage: &StorageConfig,
        api: &ApiConfig,
        token: Option<String>,
    ) -> RestConfig {
        RestConfig::new(
            format!(
                "{}/{}",
                storage.endpoint_url.trim_end_matches('/'),
                storage.bucket.trim_matches('/')
            ),
            token.map_or(Credential::None, Credential::Bearer),
        )
        .timeout(Duration::from_secs(api.timeout_secs))
        .max_retries(api.max_retries)
        .backoff(Duration::from_millis(api.backoff_ms))
    }

    /// Download an object as text. A missing object is `None`.
    ///
    /// Keys ending in `.gz` are gunzipped.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_text(&self, key: &str) -> Result<Option<String>> {
        let response = match self.rest.send(Method::GET, key, &[], None).await {
            Ok(r) => r,
            Err(e) if e.rejected_status() == Some(404) => {
                debug!("object not found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let bytes = if key.ends_with(".gz") {
            gunzip(key, &response.body)?
        } else {
            response.body
        };
        debug!(bytes = bytes.len(), "object downloaded");
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn gunzip(key: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| EnricherError::parse(format!("{key}: invalid gzip data: {e}")))?;
    Ok(out)
}
