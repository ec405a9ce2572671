//! Embedding cache backends behind one interface.

use enricher_client::RedisCache;
use enricher_shared::Result;
use enricher_storage::EmbeddingStore;

/// Where skill-set vectors are cached.
pub enum EmbeddingCache {
    /// Shared Redis REST cache.
    Redis(RedisCache),
    /// Local libSQL file; entries are scoped to the embedding model.
    Local { store: EmbeddingStore, model: String },
}

impl EmbeddingCache {
    pub async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        match self {
            Self::Redis(cache) => cache.get_vector(key).await,
            Self::Local { store, model } => store.get_vector(key, model).await,
        }
    }

    pub async fn set(&self, key: &str, vector: &[f32]) -> Result<()> {
        match self {
            Self::Redis(cache) => cache.set_vector(key, vector).await,
            Self::Local { store, model } => store.set_vector(key, model, vector).await,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Local { .. } => "local",
        }
    }
}
