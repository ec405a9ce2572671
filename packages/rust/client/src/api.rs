//! Typed routes of the backend REST API.
//!
//! Responses come either wrapped in a `{success, data}` envelope or bare;
//! both shapes are accepted. A `success: false` envelope is a rejection.

use enricher_shared::{
    ApiConfig, ApiErrorKind, EnricherError, Node, NodeId, NodePatch, Result, UserId, Webpage,
    WebpageId, WebpageUrl,
};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::rest::{Credential, RestClient, RestConfig};

/// Header carrying the backend API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Client for the backend's node and webpage routes.
#[derive(Debug, Clone)]
pub struct BackendApi {
    rest: RestClient,
}

impl BackendApi {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// REST settings for the backend: routes live under `{base_url}/api`.
    pub fn rest_config(config: &ApiConfig, api_key: String) -> RestConfig {
        RestConfig::new(
            format!("{}/api", config.base_url.trim_end_matches('/')),
            Credential::Header {
                name: API_KEY_HEADER,
                value: api_key,
            },
        )
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .max_retries(config.max_retries)
        .backoff(std::time::Duration::from_millis(config.backoff_ms))
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(node_id = %node_id))]
    pub async fn get_node(&self, node_id: &NodeId, user_id: &UserId) -> Result<Node> {
        let path = format!("nodes/{node_id}");
        let value = self.rest.get(&path, &[("userId", user_id.as_str())]).await?;
        let data = unwrap_envelope(&path, value)?;
        if data.is_null() {
            return Err(EnricherError::api(
                path,
                ApiErrorKind::Rejected {
                    status: 404,
                    body: "node not found".into(),
                },
            ));
        }
        serde_json::from_value(data)
            .map_err(|e| EnricherError::parse(format!("{path}: malformed node: {e}")))
    }

    #[instrument(skip_all, fields(node_id = %node_id))]
    pub async fn update_node(&self, node_id: &NodeId, patch: &NodePatch) -> Result<()> {
        let path = format!("nodes/{node_id}");
        let body = serde_json::to_value(patch)
            .map_err(|e| EnricherError::parse(format!("failed to encode patch: {e}")))?;
        let value = self.rest.patch(&path, &body).await?;
        unwrap_envelope(&path, value)?;
        debug!(fields = patch.set.len(), "node updated");
        Ok(())
    }

    #[instrument(skip_all, fields(node_id = %node_id))]
    pub async fn delete_node(&self, node_id: &NodeId) -> Result<()> {
        let path = format!("nodes/{node_id}");
        let value = self.rest.delete(&path).await?;
        unwrap_envelope(&path, value)?;
        info!("node deleted");
        Ok(())
    }

    /// Other nodes owned by `user_id`, excluding `exclude`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn search_by_user(&self, user_id: &UserId, exclude: &NodeId) -> Result<Vec<Node>> {
        let path = "nodes/search-by-user";
        let body = json!({"userId": user_id, "excludeNodeId": exclude});
        let value = unwrap_envelope(path, self.rest.post(path, &body).await?)?;
        let nodes = list_field(&value, "nodes");

        let mut parsed = Vec::with_capacity(nodes.len());
        for raw in nodes {
            match serde_json::from_value::<Node>(raw) {
                Ok(node) if node.id != *exclude => parsed.push(node),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping malformed node in search results"),
            }
        }
        Ok(parsed)
    }

    #[instrument(skip_all, fields(node_id = %node_id))]
    pub async fn mark_error(&self, node_id: &NodeId, error: &str) -> Result<()> {
        let path = "nodes/mark-error";
        let body = json!({"nodeId": node_id, "error": error});
        unwrap_envelope(path, self.rest.post(path, &body).await?)?;
        info!("node marked as error");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Webpages
    // -----------------------------------------------------------------------

    /// Look up the webpage for a normalized URL. Not-found is `None`.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn webpage_by_url(&self, url: &WebpageUrl) -> Result<Option<Webpage>> {
        let path = "webpages/by-url";
        let value = match self.rest.get(path, &[("url", url.as_str())]).await {
            Ok(v) => v,
            Err(e) if e.rejected_status() == Some(404) => return Ok(None),
            Err(e) => return Err(e),
        };
        if value.get("success") == Some(&Value::Bool(false)) {
            debug!("webpage not found");
            return Ok(None);
        }
        Ok(parse_webpage(unwrap_envelope(path, value)?, Some(url)))
    }

    /// Search webpages by company name.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn search_webpages(&self, query: &str) -> Result<Vec<Webpage>> {
        let path = "webpages/search";
        let body = json!({"query": query, "name": query});
        let value = unwrap_envelope(path, self.rest.post(path, &body).await?)?;
        Ok(list_field(&value, "webpages")
            .into_iter()
            .filter_map(|raw| parse_webpage(raw, None))
            .collect())
    }

    /// Fetch the webpage for `url`, creating it if absent.
    ///
    /// The backend serializes creation per URL, so concurrent callers observe
    /// the same record.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn get_or_create_webpage(
        &self,
        url: &WebpageUrl,
        name: Option<&str>,
    ) -> Result<Webpage> {
        let path = "webpages/get-or-create";
        let mut body = json!({"url": url});
        if let Some(name) = name {
            body["name"] = Value::String(name.to_string());
        }
        let value = unwrap_envelope(path, self.rest.post(path, &body).await?)?;
        parse_webpage(value, Some(url)).ok_or_else(|| {
            EnricherError::parse(format!("{path}: response carries no webpage id"))
        })
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Strip a `{success, data}` envelope, rejecting `success: false`.
fn unwrap_envelope(path: &str, value: Value) -> Result<Value> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };
    match map.get("success") {
        Some(Value::Bool(false)) => {
            let message = map
                .get("message")
                .or_else(|| map.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("request unsuccessful")
                .to_string();
            Err(EnricherError::api(
                path,
                ApiErrorKind::Rejected {
                    status: 200,
                    body: message,
                },
            ))
        }
        Some(Value::Bool(true)) if map.contains_key("data") => {
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        _ => Ok(Value::Object(map)),
    }
}

/// A list under `key`, or the value itself when it is already a list.
fn list_field(value: &Value, key: &str) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => other
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

/// Accept a full webpage record or a bare `{webpageId}` answer.
fn parse_webpage(value: Value, url: Option<&WebpageUrl>) -> Option<Webpage> {
    if value.is_null() {
        return None;
    }
    if let Ok(page) = serde_json::from_value::<Webpage>(value.clone()) {
        return Some(page);
    }
    let id = value
        .get("webpageId")
        .or_else(|| value.get("data").and_then(|d| d.get("webpageId")))
        .and_then(Value::as_str)?;
    Some(Webpage {
        id: WebpageId::new(id),
        url: url.map(|u| u.to_string()).unwrap_or_default(),
        name: value.get("name").and_then(Value::as_str).map(String::from),
        description: None,
        extra: Default::default(),
    })
}
