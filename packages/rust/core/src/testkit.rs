//! In-memory backend and service wiring for pipeline tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use enricher_client::{
    BackendApi, CallStats, EmbeddingClient, GenerationClient, ObjectStore, RestClient, VectorIndex,
};
use enricher_shared::{ApiConfig, EmbeddingConfig, GenerationConfig, StorageConfig, VectorConfig};
use enricher_storage::EmbeddingStore;
use serde_json::{Value, json};
use wiremock::{MockServer, Request, ResponseTemplate};

use crate::cache::EmbeddingCache;
use crate::services::Services;

/// Width of test vectors.
pub const DIMS: usize = 4;

#[derive(Default)]
pub struct BackendState {
    pub nodes: BTreeMap<String, Value>,
    pub patches: Vec<(String, Value)>,
    pub deleted: Vec<String>,
    pub mark_errors: Vec<Value>,
    pub webpages: BTreeMap<String, Value>,
    pub searches: usize,
    pub fail_search: bool,
}

/// Stateful stand-in for the backend's `/api` routes.
#[derive(Clone, Default)]
pub struct FakeBackend(Arc<Mutex<BackendState>>);

impl FakeBackend {
    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.0.lock().expect("backend state lock")
    }

    pub fn insert_node(&self, node: Value) {
        let id = node["_id"].as_str().expect("node has _id").to_string();
        self.state().nodes.insert(id, node);
    }

    pub fn insert_webpage(&self, page: Value) {
        let url = page["url"].as_str().expect("webpage has url").to_string();
        self.state().webpages.insert(url, page);
    }

    pub fn node(&self, id: &str) -> Option<Value> {
        self.state().nodes.get(id).cloned()
    }

    /// Mount on `server` for every path under `/api/`.
    pub async fn mount(&self, server: &MockServer) {
        wiremock::Mock::given(wiremock::matchers::path_regex("^/api/"))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
}

impl wiremock::Respond for FakeBackend {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
        let path = req.url.path().trim_start_matches("/api/").to_string();
        let method = req.method.as_str().to_string();
        let mut state = self.state();

        match (method.as_str(), path.as_str()) {
            ("POST", "nodes/search-by-user") => {
                state.searches += 1;
                if state.fail_search {
                    return ResponseTemplate::new(500);
                }
                let user = body["userId"].clone();
                let exclude = body["excludeNodeId"].clone();
                let nodes: Vec<Value> = state
                    .nodes
                    .values()
                    .filter(|n| n["userId"] == user && n["_id"] != exclude)
                    .cloned()
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({"nodes": nodes}))
            }
            ("POST", "nodes/mark-error") => {
                let id = body["nodeId"].as_str().unwrap_or_default().to_string();
                if let Some(node) = state.nodes.get_mut(&id) {
                    node["status"] = json!("error");
                    node["errorMessage"] = body["error"].clone();
                }
                state.mark_errors.push(body);
                ok(Value::Null)
            }
            ("GET", "webpages/by-url") => {
                let url = req
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "url")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                match state.webpages.get(&url) {
                    Some(page) => ok(page.clone()),
                    None => ResponseTemplate::new(404),
                }
            }
            ("POST", "webpages/search") => {
                let pages: Vec<Value> = state.webpages.values().cloned().collect();
                ResponseTemplate::new(200).set_body_json(json!({"webpages": pages}))
            }
            ("POST", "webpages/get-or-create") => {
                let url = body["url"].as_str().unwrap_or_default().to_string();
                let next = format!("w{}", state.webpages.len() + 1);
                let page = state
                    .webpages
                    .entry(url.clone())
                    .or_insert_with(|| json!({"_id": next, "url": url, "name": body["name"]}))
                    .clone();
                ok(page)
            }
            (_, p) if p.starts_with("nodes/") => {
                let id = p.trim_start_matches("nodes/").to_string();
                match method.as_str() {
                    "GET" => match state.nodes.get(&id) {
                        Some(node) => ok(node.clone()),
                        None => ResponseTemplate::new(404),
                    },
                    "PATCH" => {
                        let Some(node) = state.nodes.get_mut(&id) else {
                            return ResponseTemplate::new(404);
                        };
                        if let Some(set) = body["set"].as_object() {
                            for (k, v) in set {
                                node[k.as_str()] = v.clone();
                            }
                        }
                        if let (Some(obj), Some(unset)) =
                            (node.as_object_mut(), body["unset"].as_array())
                        {
                            for key in unset.iter().filter_map(Value::as_str) {
                                obj.remove(key);
                            }
                        }
                        state.patches.push((id, body));
                        ok(Value::Null)
                    }
                    "DELETE" => {
                        if state.nodes.remove(&id).is_none() {
                            return ResponseTemplate::new(404);
                        }
                        state.deleted.push(id);
                        ok(Value::Null)
                    }
                    _ => ResponseTemplate::new(405),
                }
            }
            _ => ResponseTemplate::new(404),
        }
    }
}

pub fn fast_api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        timeout_secs: 2,
        max_retries: 1,
        backoff_ms: 1,
        ..Default::default()
    }
}

pub fn backend_api(server: &MockServer) -> BackendApi {
    let config = fast_api_config(server);
    BackendApi::new(
        RestClient::new(BackendApi::rest_config(&config, "test-key".into())).expect("api client"),
    )
}

/// Services wired against `server`, with a fresh local embedding cache.
///
/// Routes: `/api/*` backend, `/blobs/*` objects, `/vector/*` index,
/// `/llm/chat/completions` generation, `/embed/embeddings` embeddings.
pub async fn services(server: &MockServer) -> Services {
    let uri = server.uri();
    let api_config = fast_api_config(server);
    let stats = Arc::new(CallStats::default());
    let rest = |cfg| RestClient::with_stats(cfg, Arc::clone(&stats)).expect("rest client");

    let storage = StorageConfig {
        endpoint_url: uri.clone(),
        bucket: "blobs".into(),
        ..Default::default()
    };
    let vector = VectorConfig {
        url: format!("{uri}/vector"),
        ..Default::default()
    };
    let generation = GenerationConfig {
        base_url: format!("{uri}/llm"),
        timeout_secs: 2,
        ..Default::default()
    };
    let embedding = EmbeddingConfig {
        base_url: format!("{uri}/embed"),
        dimensions: DIMS,
        ..Default::default()
    };

    let db = std::env::temp_dir().join(format!("ne_core_{}.db", uuid::Uuid::now_v7()));
    let store = EmbeddingStore::open(&db).await.expect("open cache");

    Services {
        api: BackendApi::new(rest(BackendApi::rest_config(&api_config, "test-key".into()))),
        objects: ObjectStore::new(rest(ObjectStore::rest_config(&storage, &api_config, None))),
        vectors: VectorIndex::new(
            rest(VectorIndex::rest_config(&vector, &api_config, "vec".into())),
            vector.namespace.clone(),
        ),
        cache: EmbeddingCache::Local {
            store,
            model: embedding.model.clone(),
        },
        generator: GenerationClient::new(
            rest(GenerationClient::rest_config(&generation, "llm".into())),
            generation.model.clone(),
        ),
        embedder: EmbeddingClient::new(
            rest(EmbeddingClient::rest_config(&embedding, &api_config, "emb".into())),
            &embedding,
        ),
        stats: Arc::clone(&stats),
    }
}

/// A generation answer wrapped as a chat completion.
pub fn chat_reply(content: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content.to_string()}}]
    }))
}

/// An embedding answer of width [`DIMS`].
pub fn embedding_reply(seed: f32) -> ResponseTemplate {
    let vector: Vec<f32> = (0..DIMS).map(|i| seed + i as f32).collect();
    ResponseTemplate::new(200).set_body_json(json!({"data": [{"embedding": vector}]}))
}

/// Mount a vector index that accepts upserts and reports no stored entry.
pub async fn mount_empty_index(server: &MockServer) {
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/vector/fetch/skills"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": [null]})))
        .mount(server)
        .await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/vector/upsert/skills"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "Success"})))
        .mount(server)
        .await;
}
