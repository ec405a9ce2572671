//! Shared types, error model, and configuration for the node enricher.
//!
//! This crate is the foundation depended on by all other enricher crates.
//! It provides:
//! - [`EnricherError`], the unified error type
//! - Domain types ([`Node`], [`Webpage`], [`NodePatch`], the id newtypes)
//! - Configuration ([`AppConfig`], config loading and validation)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, CacheBackendKind, CacheConfig, EmbeddingConfig, GenerationConfig,
    RuntimeConfig, StorageConfig, VectorConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, read_secret,
};
pub use error::{ApiErrorKind, EnricherError, Result};
pub use types::{
    Education, EmbeddingRecord, GeneratedDescription, InvocationEvent, InvocationResponse,
    MISSING_IDS_MESSAGE, Node, NodeId, NodePatch, NodeStatus, Organization, ResponseBody,
    RunDetails, RunId, Skill, UserId, Webpage, WebpageId, WebpageUrl, WorkExperience,
};
