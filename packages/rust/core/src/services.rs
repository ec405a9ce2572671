//! Process-scoped clients, built once per invocation and passed explicitly.

use std::path::Path;
use std::sync::Arc;

use enricher_client::{
    BackendApi, CallStats, EmbeddingClient, GenerationClient, ObjectStore, RedisCache,
    RestClient, VectorIndex,
};
use enricher_shared::{AppConfig, CacheBackendKind, Result, read_secret};
use enricher_storage::EmbeddingStore;
use tracing::debug;

use crate::cache::EmbeddingCache;

/// Every external collaborator a run talks to.
pub struct Services {
    pub api: BackendApi,
    pub objects: ObjectStore,
    pub vectors: VectorIndex,
    pub cache: EmbeddingCache,
    pub generator: GenerationClient,
    pub embedder: EmbeddingClient,
    /// Counters shared by every client above.
    pub stats: Arc<CallStats>,
}

impl Services {
    /// Build all clients from config, reading secrets from the environment.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let stats = Arc::new(CallStats::default());
        let rest = |cfg| RestClient::with_stats(cfg, Arc::clone(&stats));

        let api = BackendApi::new(rest(BackendApi::rest_config(
            &config.api,
            read_secret(&config.api.api_key_env)?,
        ))?);
        let objects = ObjectStore::new(rest(ObjectStore::rest_config(
            &config.storage,
            &config.api,
            read_secret(&config.storage.token_env).ok(),
        ))?);
        let vectors = VectorIndex::new(
            rest(VectorIndex::rest_config(
                &config.vector,
                &config.api,
                read_secret(&config.vector.token_env)?,
            ))?,
            config.vector.namespace.clone(),
        );
        let generator = GenerationClient::new(
            rest(GenerationClient::rest_config(
                &config.generation,
                read_secret(&config.generation.api_key_env)?,
            ))?,
            config.generation.model.clone(),
        );
        let embedder = EmbeddingClient::new(
            rest(EmbeddingClient::rest_config(
                &config.embedding,
                &config.api,
                read_secret(&config.embedding.api_key_env)?,
            ))?,
            &config.embedding,
        );

        let cache = match config.cache.backend {
            CacheBackendKind::Redis => EmbeddingCache::Redis(RedisCache::new(rest(
                RedisCache::rest_config(
                    &config.cache,
                    &config.api,
                    read_secret(&config.cache.token_env)?,
                ),
            )?)),
            CacheBackendKind::Local => EmbeddingCache::Local {
                store: EmbeddingStore::open(Path::new(&config.cache.path)).await?,
                model: config.embedding.model.clone(),
            },
        };
        debug!(cache = cache.backend_name(), "services ready");

        Ok(Self {
            api,
            objects,
            vectors,
            cache,
            generator,
            embedder,
            stats,
        })
    }
}
