//! SQL migration definitions for the local embedding cache.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: embedding_cache",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Skill-set vectors keyed by content hash
CREATE TABLE IF NOT EXISTS embedding_cache (
    cache_key   TEXT PRIMARY KEY,
    model_id    TEXT NOT NULL,
    dimensions  INTEGER NOT NULL,
    vector_json TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Track cache hits",
            sql: r#"
ALTER TABLE embedding_cache ADD COLUMN hit_count INTEGER NOT NULL DEFAULT 0;
ALTER TABLE embedding_cache ADD COLUMN last_hit_at TEXT;

CREATE INDEX IF NOT EXISTS idx_embedding_cache_created ON embedding_cache(created_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
