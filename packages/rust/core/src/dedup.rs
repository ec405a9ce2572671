//! Duplicate node resolution for one user.
//!
//! Two nodes of the same user are the same entity when their identity keys
//! match: the profile username if set, else the identity of the normalized
//! profile URL (the LinkedIn handle, or host plus path for other sites). The
//! earliest-created node is canonical; later duplicates are folded into it
//! and deleted.

use std::cmp::Ordering;

use enricher_client::BackendApi;
use enricher_shared::{EnricherError, Node, NodeId, NodePatch, Result, WebpageUrl};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

/// Node fields a duplicate may contribute to the canonical record. Inline
/// HTML stays with its own node; only the stored object key moves.
const MERGEABLE_FIELDS: &[&str] = &[
    "name",
    "linkedinUsername",
    "profileUrl",
    "htmlPath",
    "about",
    "bio",
    "linkedinHeadline",
    "currentLocation",
    "workExperience",
    "education",
    "skills",
    "organizations",
    "description",
];

/// Result of a dedup pass.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// The record the rest of the run works on.
    pub canonical: Node,
    /// Duplicates folded into `canonical` and deleted, in creation order.
    pub removed: Vec<NodeId>,
}

impl DedupOutcome {
    /// `node` stays canonical; nothing was merged.
    pub fn unchanged(node: &Node) -> Self {
        Self {
            canonical: node.clone(),
            removed: Vec::new(),
        }
    }

    pub fn is_deduplicated(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Identity key used to decide whether two nodes describe the same profile.
pub fn identity_key(node: &Node) -> Option<String> {
    if let Some(username) = node
        .linkedin_username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
    {
        return Some(username.to_lowercase());
    }
    node.profile_url
        .as_deref()
        .and_then(|raw| WebpageUrl::parse(raw).ok())
        .and_then(|url| url.profile_identity())
}

/// Earliest `createdAt` first; undated nodes last; ties by id.
fn creation_order(a: &Node, b: &Node) -> Ordering {
    let by_date = match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| a.id.cmp(&b.id))
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn to_map(node: &Node) -> Result<Map<String, Value>> {
    match serde_json::to_value(node) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(EnricherError::parse(format!("node {} is not an object", node.id))),
        Err(e) => Err(EnricherError::parse(format!("failed to encode node {}: {e}", node.id))),
    }
}

/// Copy non-empty mergeable fields of `duplicate` onto `canonical`, recording
/// every changed field in `patch`.
fn merge_into(canonical: &mut Map<String, Value>, duplicate: &Map<String, Value>, patch: &mut NodePatch) {
    for &field in MERGEABLE_FIELDS {
        let Some(value) = duplicate.get(field).filter(|v| has_content(v)) else {
            continue;
        };
        if canonical.get(field) != Some(value) {
            canonical.insert(field.to_string(), value.clone());
            patch.set_field(field, value.clone());
        }
    }
}

/// Finds and folds duplicates of a node through the backend API.
pub struct DedupResolver<'a> {
    api: &'a BackendApi,
}

impl<'a> DedupResolver<'a> {
    pub fn new(api: &'a BackendApi) -> Self {
        Self { api }
    }

    /// Resolve `node` against the other nodes of its user.
    ///
    /// A failed search is reported as [`EnricherError::DedupSearch`]; merge
    /// writes that fail are ordinary API errors.
    #[instrument(skip_all, fields(node_id = %node.id, user_id = %node.user_id))]
    pub async fn resolve(&self, node: &Node) -> Result<DedupOutcome> {
        let Some(key) = identity_key(node) else {
            debug!("node has no identity key, skipping dedup");
            return Ok(DedupOutcome::unchanged(node));
        };

        let candidates = self
            .api
            .search_by_user(&node.user_id, &node.id)
            .await
            .map_err(|e| EnricherError::DedupSearch(e.to_string()))?;

        let mut group: Vec<Node> = candidates
            .into_iter()
            .filter(|c| identity_key(c).as_deref() == Some(key.as_str()))
            .collect();
        if group.is_empty() {
            debug!(key, "no duplicates");
            return Ok(DedupOutcome::unchanged(node));
        }

        group.push(node.clone());
        group.sort_by(creation_order);
        let first = group.remove(0);

        let mut merged = to_map(&first)?;
        let mut patch = NodePatch::default();
        for duplicate in &group {
            merge_into(&mut merged, &to_map(duplicate)?, &mut patch);
        }
        let canonical: Node = serde_json::from_value(Value::Object(merged))
            .map_err(|e| EnricherError::parse(format!("merged node {}: {e}", first.id)))?;

        if !patch.is_empty() {
            self.api.update_node(&canonical.id, &patch).await?;
        }

        let mut removed = Vec::with_capacity(group.len());
        for duplicate in group {
            match self.api.delete_node(&duplicate.id).await {
                Ok(()) => {}
                Err(e) if e.rejected_status() == Some(404) => {
                    warn!(duplicate = %duplicate.id, "duplicate already gone");
                }
                Err(e) => return Err(e),
            }
            removed.push(duplicate.id);
        }

        info!(
            canonical = %canonical.id,
            removed = removed.len(),
            merged_fields = patch.set.len(),
            "duplicates resolved"
        );
        Ok(DedupOutcome { canonical, removed })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testkit::{FakeBackend, backend_api};

    fn node(id: &str, created: &str, extra: Value) -> Value {
        let mut value = json!({
            "_id": id,
            "userId": "u1",
            "profileUrl": "https://www.linkedin.com/in/Jane-Doe/",
            "createdAt": created,
        });
        if let (Some(obj), Value::Object(more)) = (value.as_object_mut(), extra) {
            obj.extend(more);
        }
        value
    }

    fn parse(value: Value) -> Node {
        serde_json::from_value(value).expect("valid node")
    }

    #[test]
    fn identity_prefers_username_then_url_segment() {
        let by_name = parse(json!({"_id": "a", "linkedinUsername": " Jane-Doe "}));
        let by_url = parse(json!({"_id": "b", "profileUrl": "linkedin.com/in/jane-doe?utm=x"}));
        let neither = parse(json!({"_id": "c"}));

        assert_eq!(identity_key(&by_name).as_deref(), Some("jane-doe"));
        assert_eq!(identity_key(&by_url).as_deref(), Some("jane-doe"));
        assert_eq!(identity_key(&neither), None);
    }

    #[tokio::test]
    async fn shared_trailing_segments_are_not_duplicates() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        for (id, url, name) in [
            ("n1", "https://www.linkedin.com/in/jane-doe/recent-activity/all/", "Jane Doe"),
            ("n2", "https://www.linkedin.com/in/john-smith/recent-activity/all/", "John Smith"),
            ("n3", "https://github.com/john", "John"),
            ("n4", "https://example.org/team/john", "John Roe"),
        ] {
            backend.insert_node(json!({
                "_id": id,
                "userId": "u1",
                "profileUrl": url,
                "name": name,
                "createdAt": "2024-01-01T00:00:00Z",
            }));
        }

        let api = backend_api(&server);
        let resolver = DedupResolver::new(&api);
        for id in ["n1", "n3"] {
            let processed = parse(backend.node(id).expect("node"));
            let outcome = resolver.resolve(&processed).await.expect("resolve");
            assert!(!outcome.is_deduplicated(), "{id} matched another profile");
            assert_eq!(outcome.canonical, processed);
        }

        let state = backend.state();
        assert!(state.deleted.is_empty());
        assert!(state.patches.is_empty());
        assert_eq!(state.nodes["n1"]["name"], "Jane Doe");
    }

    #[tokio::test]
    async fn inline_html_is_not_merged() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.insert_node(node("n1", "2024-01-01T00:00:00Z", json!({})));
        backend.insert_node(node(
            "n2",
            "2024-02-01T00:00:00Z",
            json!({"html": "<html><body>full page</body></html>", "htmlPath": "html/n2.html.gz"}),
        ));

        let api = backend_api(&server);
        let processed = parse(backend.node("n1").expect("n1"));
        let outcome = DedupResolver::new(&api).resolve(&processed).await.expect("resolve");

        assert_eq!(outcome.canonical.html_path.as_deref(), Some("html/n2.html.gz"));
        let state = backend.state();
        let (_, patch) = state.patches.last().expect("canonical patched");
        assert!(patch["set"].get("html").is_none());
        assert_eq!(patch["set"]["htmlPath"], "html/n2.html.gz");
        assert!(state.nodes["n1"].get("html").is_none());
    }

    #[tokio::test]
    async fn later_duplicate_is_merged_and_deleted() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.insert_node(node("n1", "2024-01-01T00:00:00Z", json!({"about": null})));
        backend.insert_node(node(
            "n2",
            "2024-03-01T00:00:00Z",
            json!({"about": "Builds things", "currentLocation": "Berlin"}),
        ));

        let api = backend_api(&server);
        let processed = parse(backend.node("n1").expect("n1"));
        let outcome = DedupResolver::new(&api).resolve(&processed).await.expect("resolve");

        assert_eq!(outcome.canonical.id.as_str(), "n1");
        assert_eq!(outcome.removed, vec![NodeId::from("n2")]);
        assert_eq!(outcome.canonical.about.as_deref(), Some("Builds things"));

        let stored = backend.node("n1").expect("n1 kept");
        assert_eq!(stored["currentLocation"], "Berlin");
        assert!(backend.node("n2").is_none());
    }

    #[tokio::test]
    async fn second_resolve_does_nothing() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.insert_node(node("n1", "2024-01-01T00:00:00Z", json!({})));
        backend.insert_node(node("n2", "2024-02-01T00:00:00Z", json!({"bio": "Engineer"})));

        let api = backend_api(&server);
        let resolver = DedupResolver::new(&api);
        let processed = parse(backend.node("n1").expect("n1"));
        resolver.resolve(&processed).await.expect("first resolve");

        let (patches, deletes) = {
            let state = backend.state();
            (state.patches.len(), state.deleted.len())
        };

        let again = parse(backend.node("n1").expect("n1"));
        let outcome = resolver.resolve(&again).await.expect("second resolve");
        assert!(!outcome.is_deduplicated());

        let state = backend.state();
        assert_eq!(state.patches.len(), patches);
        assert_eq!(state.deleted.len(), deletes);
    }

    #[tokio::test]
    async fn processed_node_folds_into_earlier_canonical() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.insert_node(node("n1", "2024-01-01T00:00:00Z", json!({})));
        backend.insert_node(node("n2", "2024-05-01T00:00:00Z", json!({"htmlPath": "html/n2.html"})));

        let api = backend_api(&server);
        let processed = parse(backend.node("n2").expect("n2"));
        let outcome = DedupResolver::new(&api).resolve(&processed).await.expect("resolve");

        assert_eq!(outcome.canonical.id.as_str(), "n1");
        assert_eq!(outcome.canonical.html_path.as_deref(), Some("html/n2.html"));
        assert_eq!(backend.state().deleted, vec!["n2".to_string()]);
    }

    #[tokio::test]
    async fn different_profiles_are_left_alone() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.insert_node(node("n1", "2024-01-01T00:00:00Z", json!({})));
        backend.insert_node(node(
            "n3",
            "2023-01-01T00:00:00Z",
            json!({"profileUrl": "https://www.linkedin.com/in/someone-else"}),
        ));

        let api = backend_api(&server);
        let processed = parse(backend.node("n1").expect("n1"));
        let outcome = DedupResolver::new(&api).resolve(&processed).await.expect("resolve");

        assert!(!outcome.is_deduplicated());
        assert_eq!(outcome.canonical.id.as_str(), "n1");
        assert!(backend.state().deleted.is_empty());
    }

    #[tokio::test]
    async fn search_failure_is_non_fatal() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.state().fail_search = true;

        let api = backend_api(&server);
        let processed = parse(node("n1", "2024-01-01T00:00:00Z", json!({})));
        let err = DedupResolver::new(&api).resolve(&processed).await.unwrap_err();

        assert!(matches!(err, EnricherError::DedupSearch(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn nodes_without_identity_skip_search() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;

        let api = backend_api(&server);
        let processed = parse(json!({"_id": "n1", "userId": "u1"}));
        let outcome = DedupResolver::new(&api).resolve(&processed).await.expect("resolve");

        assert!(!outcome.is_deduplicated());
        assert_eq!(backend.state().searches, 0);
    }
}
