//! Network clients for the node enricher.
//!
//! [`RestClient`] carries retry, timeout and call accounting; the typed
//! clients on top of it speak the backend API, object storage, the vector
//! index, the Redis cache, and the generation/embedding providers.

pub mod api;
pub mod cache;
pub mod embedding;
pub mod generation;
pub mod object_store;
pub mod rest;
pub mod vector;

pub use api::{API_KEY_HEADER, BackendApi};
pub use cache::RedisCache;
pub use embedding::EmbeddingClient;
pub use generation::GenerationClient;
pub use object_store::ObjectStore;
pub use rest::{CallStats, CallStatsSnapshot, Credential, RawResponse, RestClient, RestConfig};
pub use vector::{VectorEntry, VectorIndex};
