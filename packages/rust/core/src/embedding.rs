//! Skill vector maintenance.
//!
//! A node's skills are reduced to a normalized set; the set's hash keys the
//! embedding cache, so an unchanged set never reaches the provider and a
//! changed one always misses.

use enricher_client::{EmbeddingClient, VectorIndex};
use enricher_scrape::normalize_text;
use enricher_shared::{EmbeddingRecord, EnricherError, Node, Result, Skill};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::cache::EmbeddingCache;

/// Where the vector written for a node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSource {
    Cache,
    Provider,
}

/// What an embedding pass did.
#[derive(Debug, Clone)]
pub struct EmbeddingUpdate {
    pub record: EmbeddingRecord,
    pub source: VectorSource,
    /// False when the index already held this exact vector.
    pub written: bool,
}

/// Normalized, deduplicated, sorted skill names.
pub fn skill_set(skills: &[Skill]) -> Vec<String> {
    let mut set: Vec<String> = skills
        .iter()
        .map(|s| normalize_text(&s.name))
        .filter(|s| !s.is_empty())
        .collect();
    set.sort();
    set.dedup();
    set
}

/// Cache key for a skill set.
pub fn cache_key(skill_set: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(skill_set.join("|").as_bytes());
    format!("skillset:{:x}", hasher.finalize())
}

/// Provider input: one line per skill, with its description when known.
fn embedding_input(skills: &[Skill]) -> String {
    skills
        .iter()
        .filter(|s| !s.name.trim().is_empty())
        .map(|s| match s.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => format!("{}: {d}", s.name.trim()),
            _ => s.name.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keeps a node's skill vector in the index current.
pub struct EmbeddingMaintainer<'a> {
    vectors: &'a VectorIndex,
    cache: &'a EmbeddingCache,
    embedder: &'a EmbeddingClient,
}

impl<'a> EmbeddingMaintainer<'a> {
    pub fn new(
        vectors: &'a VectorIndex,
        cache: &'a EmbeddingCache,
        embedder: &'a EmbeddingClient,
    ) -> Self {
        Self {
            vectors,
            cache,
            embedder,
        }
    }

    /// Upsert the vector for `skills` under the node's id.
    ///
    /// Returns `None` when there are no skills to embed. Every failure is
    /// reported as [`EnricherError::Embedding`].
    #[instrument(skip_all, fields(node_id = %node.id, skills = skills.len()))]
    pub async fn upsert(&self, node: &Node, skills: &[Skill]) -> Result<Option<EmbeddingUpdate>> {
        self.try_upsert(node, skills).await.map_err(|e| match e {
            EnricherError::Embedding(_) => e,
            other => EnricherError::Embedding(other.to_string()),
        })
    }

    async fn try_upsert(&self, node: &Node, skills: &[Skill]) -> Result<Option<EmbeddingUpdate>> {
        let set = skill_set(skills);
        if set.is_empty() {
            debug!("no skills to embed");
            return Ok(None);
        }
        let key = cache_key(&set);
        let metadata = json!({
            "userId": node.user_id,
            "skills": set,
            "name": node.name,
        });

        let cached = match self.cache.get(&key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(backend = self.cache.backend_name(), error = %e, "cache read failed, treating as miss");
                None
            }
        };

        let (vector, source, written) = match cached {
            Some(vector) => {
                let current = match self.vectors.get(&node.id).await {
                    Ok(entry) => entry.map(|e| e.vector),
                    Err(e) => {
                        warn!(error = %e, "vector lookup failed, rewriting");
                        None
                    }
                };
                let stale = current.as_deref() != Some(vector.as_slice());
                if stale {
                    self.vectors.upsert(&node.id, &vector, metadata).await?;
                }
                (vector, VectorSource::Cache, stale)
            }
            None => {
                let vector = self.embedder.embed(&embedding_input(skills)).await?;
                self.vectors.upsert(&node.id, &vector, metadata).await?;
                if let Err(e) = self.cache.set(&key, &vector).await {
                    warn!(backend = self.cache.backend_name(), error = %e, "cache write failed");
                }
                (vector, VectorSource::Provider, true)
            }
        };

        info!(cache_key = %key, ?source, written, "skill vector maintained");
        Ok(Some(EmbeddingUpdate {
            record: EmbeddingRecord {
                node_id: node.id.clone(),
                vector,
                skills: set,
                cache_key: key,
            },
            source,
            written,
        }))
    }
}
