//! libSQL-backed local embedding cache.
//!
//! [`EmbeddingStore`] keeps skill-set vectors on disk for single-host runs
//! where no shared Redis cache is configured. Keys are content hashes, so an
//! entry never needs invalidating when a skill set changes: a changed set
//! simply hashes to a different key.

mod migrations;

use std::path::Path;

use chrono::Utc;
use enricher_shared::{EnricherError, Result};
use libsql::{Connection, Database, params};

/// Summary of the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_hits: u64,
}

/// Local vector cache wrapping a libSQL database.
pub struct EmbeddingStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl EmbeddingStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EnricherError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EnricherError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| EnricherError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        EnricherError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Vectors
    // -----------------------------------------------------------------------

    /// Cached vector for `cache_key` computed by `model_id`, if any.
    pub async fn get_vector(&self, cache_key: &str, model_id: &str) -> Result<Option<Vec<f32>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT vector_json FROM embedding_cache WHERE cache_key = ?1 AND model_id = ?2",
                params![cache_key, model_id],
            )
            .await
            .map_err(|e| EnricherError::Storage(e.to_string()))?;

        let raw: String = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| EnricherError::Storage(e.to_string()))?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(EnricherError::Storage(e.to_string())),
        };

        let vector = serde_json::from_str(&raw)
            .map_err(|e| EnricherError::Storage(format!("corrupt vector for {cache_key}: {e}")))?;

        self.conn
            .execute(
                "UPDATE embedding_cache SET hit_count = hit_count + 1, last_hit_at = ?2
                 WHERE cache_key = ?1",
                params![cache_key, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| EnricherError::Storage(e.to_string()))?;

        Ok(Some(vector))
    }

    /// Store a vector (upserts).
    pub async fn set_vector(&self, cache_key: &str, model_id: &str, vector: &[f32]) -> Result<()> {
        let vector_json = serde_json::to_string(vector)
            .map_err(|e| EnricherError::Storage(format!("failed to encode vector: {e}")))?;
        let dimensions = i64::try_from(vector.len())
            .map_err(|_| EnricherError::validation("vector too large"))?;

        self.conn
            .execute(
                "INSERT INTO embedding_cache (cache_key, model_id, dimensions, vector_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(cache_key) DO UPDATE SET
                   model_id = excluded.model_id,
                   dimensions = excluded.dimensions,
                   vector_json = excluded.vector_json,
                   created_at = excluded.created_at",
                params![
                    cache_key,
                    model_id,
                    dimensions,
                    vector_json,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| EnricherError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Entry and hit counts.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM embedding_cache",
                params![],
            )
            .await
            .map_err(|e| EnricherError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let entries: i64 = row
                    .get(0)
                    .map_err(|e| EnricherError::Storage(e.to_string()))?;
                let hits: i64 = row
                    .get(1)
                    .map_err(|e| EnricherError::Storage(e.to_string()))?;
                Ok(CacheStats {
                    entries: entries.max(0) as u64,
                    total_hits: hits.max(0) as u64,
                })
            }
            Ok(None) => Ok(CacheStats::default()),
            Err(e) => Err(EnricherError::Storage(e.to_string())),
        }
    }

    /// Remove every cached vector. Returns the number of rows deleted.
    pub async fn clear(&self) -> Result<u64> {
        self.conn
            .execute("DELETE FROM embedding_cache", params![])
            .await
            .map_err(|e| EnricherError::Storage(e.to_string()))
    }
}
