//! Source HTML resolution for a node.

use enricher_client::ObjectStore;
use enricher_shared::{EnricherError, Node, Result};
use tracing::{debug, info, instrument};

/// Where a node's HTML came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    Inline,
    ObjectStore,
}

/// Resolves a node's raw HTML, downloading it only when not inline.
pub struct ContentFetcher<'a> {
    objects: &'a ObjectStore,
}

impl<'a> ContentFetcher<'a> {
    pub fn new(objects: &'a ObjectStore) -> Self {
        Self { objects }
    }

    /// Return the node's HTML, or fail with [`EnricherError::ContentUnavailable`].
    #[instrument(skip_all, fields(node_id = %node.id))]
    pub async fn fetch(&self, node: &Node) -> Result<(String, ContentSource)> {
        if let Some(html) = node.inline_html() {
            debug!(bytes = html.len(), "using inline HTML");
            return Ok((html.to_string(), ContentSource::Inline));
        }

        let key = node.storage_key().ok_or_else(|| {
            EnricherError::ContentUnavailable(format!("node {} has no HTML and no storage key", node.id))
        })?;

        let html = match self.objects.get_text(key).await {
            Ok(Some(html)) if !html.trim().is_empty() => html,
            Ok(Some(_)) => {
                return Err(EnricherError::ContentUnavailable(format!("object '{key}' is empty")));
            }
            Ok(None) => {
                return Err(EnricherError::ContentUnavailable(format!("object '{key}' not found")));
            }
            Err(e) => {
                return Err(EnricherError::ContentUnavailable(format!(
                    "failed to download '{key}': {e}"
                )));
            }
        };

        info!(key, bytes = html.len(), "HTML downloaded");
        Ok((html, ContentSource::ObjectStore))
    }
}

#[cfg(test)]
mod tests {
    use enricher_client::RestClient;
    use enricher_shared::{ApiConfig, StorageConfig};

    use super::*;

    fn store_for(server: &wiremock::MockServer) -> ObjectStore {
        let storage = StorageConfig {
            endpoint_url: server.uri(),
            bucket: "profiles".into(),
            ..Default::default()
        };
        let api = ApiConfig {
            backoff_ms: 1,
            max_retries: 0,
            ..Default::default()
        };
        ObjectStore::new(
            RestClient::new(ObjectStore::rest_config(&storage, &api, None)).expect("client"),
        )
    }

    #[tokio::test]
    async fn inline_html_skips_storage() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(wiremock::ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let node = Node {
            html: Some("<html>inline</html>".into()),
            html_path: Some("n1.html".into()),
            ..Default::default()
        };
        let (html, source) = ContentFetcher::new(&store).fetch(&node).await.expect("fetch");
        assert_eq!(html, "<html>inline</html>");
        assert_eq!(source, ContentSource::Inline);
    }

    #[tokio::test]
    async fn downloads_by_storage_key() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/profiles/n1.html"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<p>stored</p>"))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let node = Node {
            html_path: Some("n1.html".into()),
            ..Default::default()
        };
        let (html, source) = ContentFetcher::new(&store).fetch(&node).await.expect("fetch");
        assert_eq!(html, "<p>stored</p>");
        assert_eq!(source, ContentSource::ObjectStore);
    }

    #[tokio::test]
    async fn missing_key_and_empty_objects_are_unavailable() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/profiles/empty.html"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("  "))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let fetcher = ContentFetcher::new(&store);

        let err = fetcher.fetch(&Node::default()).await.unwrap_err();
        assert!(matches!(err, EnricherError::ContentUnavailable(_)));

        let node = Node {
            html_path: Some("empty.html".into()),
            ..Default::default()
        };
        let err = fetcher.fetch(&node).await.unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }
}
