//! Node enrichment pipeline.
//!
//! This crate ties together content fetching, scraping, duplicate
//! resolution, description generation and skill-vector maintenance into a
//! single run per node ([`NodeProcessor`]). Every external collaborator is
//! reached through [`Services`], built once per invocation.

pub mod cache;
pub mod dedup;
pub mod describe;
pub mod embedding;
pub mod fetcher;
pub mod processor;
pub mod services;

#[cfg(test)]
mod testkit;

pub use cache::EmbeddingCache;
pub use dedup::{DedupOutcome, DedupResolver, identity_key};
pub use describe::{Described, DescriptionGenerator};
pub use embedding::{EmbeddingMaintainer, EmbeddingUpdate, VectorSource, cache_key, skill_set};
pub use fetcher::{ContentFetcher, ContentSource};
pub use processor::{
    NodeProcessor, PipelineObserver, RunOutcome, SUCCESS_MESSAGE, SilentObserver, Stage,
    UP_TO_DATE_MESSAGE,
};
pub use services::Services;
