//! Application configuration for the node enricher.
//!
//! The optional config file lives at `~/.node-enricher/node-enricher.toml`.
//! Environment variables override file values, which override defaults.
//! Secrets are never stored in the file: each section names the environment
//! variable that holds its credential.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EnricherError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "node-enricher.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".node-enricher";

// ---------------------------------------------------------------------------
// Config structs (matching node-enricher.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend REST API.
    #[serde(default)]
    pub api: ApiConfig,

    /// Object storage holding raw profile HTML.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Vector index for skill embeddings.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Embedding cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Description generation provider.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding provider.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Per-invocation runtime limits.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend API (routes are mounted under `/api`).
    #[serde(default)]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_api_key_env() -> String {
    "INSIGHTS_API_KEY".into()
}
fn default_timeout_secs() -> u64 {
    8
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// HTTP endpoint of the bucket gateway.
    #[serde(default)]
    pub endpoint_url: String,

    /// Bucket holding the HTML blobs.
    #[serde(default)]
    pub bucket: String,

    /// Name of the env var holding the bearer token for the gateway.
    #[serde(default = "default_storage_token_env")]
    pub token_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            bucket: String::new(),
            token_env: default_storage_token_env(),
        }
    }
}

fn default_storage_token_env() -> String {
    "R2_ACCESS_TOKEN".into()
}

/// `[vector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// REST URL of the vector index.
    #[serde(default)]
    pub url: String,

    /// Name of the env var holding the index token.
    #[serde(default = "default_vector_token_env")]
    pub token_env: String,

    /// Namespace the skill vectors live in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token_env: default_vector_token_env(),
            namespace: default_namespace(),
        }
    }
}

fn default_vector_token_env() -> String {
    "UPSTASH_VECTOR_REST_TOKEN".into()
}
fn default_namespace() -> String {
    "skills".into()
}

/// Which embedding cache to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Redis REST endpoint shared by all workers.
    #[default]
    Redis,
    /// A local libSQL file (single-host runs).
    Local,
}

impl std::str::FromStr for CacheBackendKind {
    type Err = EnricherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "local" => Ok(Self::Local),
            other => Err(EnricherError::config(format!(
                "unknown cache backend '{other}': expected 'redis' or 'local'"
            ))),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Redis REST URL (redis backend).
    #[serde(default)]
    pub url: String,

    /// Name of the env var holding the Redis REST token.
    #[serde(default = "default_cache_token_env")]
    pub token_env: String,

    /// Database file (local backend).
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            url: String::new(),
            token_env: default_cache_token_env(),
            path: default_cache_path(),
        }
    }
}

fn default_cache_token_env() -> String {
    "UPSTASH_REDIS_REST_TOKEN".into()
}
fn default_cache_path() -> String {
    "var/cache/embeddings.db".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// Name of the env var holding the provider key.
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,

    /// Model used for descriptions.
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Timeout for the single generation attempt, in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            api_key_env: default_generation_key_env(),
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_generation_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_generation_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_generation_timeout() -> u64 {
    60
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding API base URL.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Name of the env var holding the provider key.
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector width.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_key_env(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.jina.ai/v1".into()
}
fn default_embedding_key_env() -> String {
    "JINA_EMBEDDING_API_KEY".into()
}
fn default_embedding_model() -> String {
    "jina-embeddings-v3".into()
}
fn default_dimensions() -> usize {
    1024
}

/// `[runtime]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Wall-clock budget for a single invocation, in seconds.
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_secs: u64,

    /// Identifier reported in logs.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            processing_timeout_secs: default_processing_timeout(),
            worker_id: default_worker_id(),
        }
    }
}

fn default_processing_timeout() -> u64 {
    120
}
fn default_worker_id() -> String {
    "local-worker".into()
}

// ---------------------------------------------------------------------------
// Environment overlay
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BASE_API_URL") {
            self.api.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("API_TIMEOUT_SECONDS") {
            self.api.timeout_secs = parse_number("API_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("API_MAX_RETRIES") {
            self.api.max_retries = parse_number("API_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("API_BACKOFF_MS") {
            self.api.backoff_ms = parse_number("API_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("PROCESSING_TIMEOUT") {
            self.runtime.processing_timeout_secs = parse_number("PROCESSING_TIMEOUT", &v)?;
        }
        if let Some(v) = get("WORKER_ID").or_else(|| get("AWS_LAMBDA_FUNCTION_NAME")) {
            self.runtime.worker_id = v;
        }
        if let Some(v) = get("R2_ENDPOINT_URL") {
            self.storage.endpoint_url = v;
        }
        if let Some(v) = get("R2_BUCKET_NAME") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("UPSTASH_VECTOR_REST_URL") {
            self.vector.url = v;
        }
        if let Some(v) = get("VECTOR_NAMESPACE") {
            self.vector.namespace = v;
        }
        if let Some(v) = get("CACHE_BACKEND") {
            self.cache.backend = v.parse()?;
        }
        if let Some(v) = get("UPSTASH_REDIS_REST_URL") {
            self.cache.url = v;
        }
        if let Some(v) = get("CACHE_PATH") {
            self.cache.path = v;
        }
        if let Some(v) = get("GENERATION_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Some(v) = get("GENERATION_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = parse_number("EMBEDDING_DIMENSIONS", &v)?;
        }
        Ok(())
    }

    /// Check that every value a run needs is present, reporting all gaps at once.
    pub fn validate(&self) -> Result<()> {
        self.validate_with(|key| std::env::var(key).ok())
    }

    /// [`AppConfig::validate`] against an arbitrary variable source.
    pub fn validate_with<F>(&self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing: Vec<String> = Vec::new();
        let has = |key: &str| lookup(key).is_some_and(|v| !v.trim().is_empty());

        if self.api.base_url.is_empty() {
            missing.push("BASE_API_URL".into());
        }
        if !has(&self.api.api_key_env) {
            missing.push(self.api.api_key_env.clone());
        }
        if self.storage.endpoint_url.is_empty() {
            missing.push("R2_ENDPOINT_URL".into());
        }
        if self.storage.bucket.is_empty() {
            missing.push("R2_BUCKET_NAME".into());
        }
        if self.vector.url.is_empty() {
            missing.push("UPSTASH_VECTOR_REST_URL".into());
        }
        if !has(&self.vector.token_env) {
            missing.push(self.vector.token_env.clone());
        }
        if self.cache.backend == CacheBackendKind::Redis {
            if self.cache.url.is_empty() {
                missing.push("UPSTASH_REDIS_REST_URL".into());
            }
            if !has(&self.cache.token_env) {
                missing.push(self.cache.token_env.clone());
            }
        }
        if !has(&self.generation.api_key_env) {
            missing.push(self.generation.api_key_env.clone());
        }
        if !has(&self.embedding.api_key_env) {
            missing.push(self.embedding.api_key_env.clone());
        }

        if missing.is_empty() {
            tracing::debug!("configuration validated");
            Ok(())
        } else {
            Err(EnricherError::config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EnricherError::config(format!("{key} must be a number, got '{value}'")))
}

/// Read a secret from the environment variable named by a config section.
pub fn read_secret(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(EnricherError::config(format!(
            "secret not found. Set the {env_name} environment variable."
        ))),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.node-enricher/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EnricherError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.node-enricher/node-enricher.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the config file (defaults if absent) and apply environment overrides.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env()?;
    Ok(config)
}

/// Load the application config from a specific file path (no env overlay).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnricherError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EnricherError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnricherError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnricherError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnricherError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("INSIGHTS_API_KEY"));
        assert!(toml_str.contains("jina-embeddings-v3"));
    }

    #[test]
    fn defaults_are_conservative() {
        let config = AppConfig::default();
        assert_eq!(config.api.max_retries, 3);
        assert!(config.api.timeout_secs < 10);
        assert_eq!(config.vector.namespace, "skills");
        assert_eq!(config.cache.backend, CacheBackendKind::Redis);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[api]
base_url = "https://api.example.com"
max_retries = 5

[cache]
backend = "local"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.api.max_retries, 5);
        assert_eq!(config.api.timeout_secs, 8);
        assert_eq!(config.cache.backend, CacheBackendKind::Local);
        assert_eq!(config.embedding.dimensions, 1024);
    }

    #[test]
    fn env_overrides_file_values() {
        let env = vars(&[
            ("BASE_API_URL", "https://api.example.com/"),
            ("API_MAX_RETRIES", "1"),
            ("API_TIMEOUT_SECONDS", "4"),
            ("CACHE_BACKEND", "local"),
            ("VECTOR_NAMESPACE", "people"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env_from(|k| env.get(k).cloned())
            .expect("apply env");
        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.api.max_retries, 1);
        assert_eq!(config.api.timeout_secs, 4);
        assert_eq!(config.cache.backend, CacheBackendKind::Local);
        assert_eq!(config.vector.namespace, "people");
    }

    #[test]
    fn non_numeric_env_is_rejected() {
        let env = vars(&[("API_MAX_RETRIES", "lots")]);
        let mut config = AppConfig::default();
        let err = config
            .apply_env_from(|k| env.get(k).cloned())
            .unwrap_err();
        assert!(err.to_string().contains("API_MAX_RETRIES"));
    }

    #[test]
    fn validation_lists_every_missing_value() {
        let config = AppConfig::default();
        let err = config.validate_with(|_| None).unwrap_err().to_string();
        assert!(err.contains("BASE_API_URL"));
        assert!(err.contains("INSIGHTS_API_KEY"));
        assert!(err.contains("UPSTASH_REDIS_REST_URL"));
        assert!(err.contains("JINA_EMBEDDING_API_KEY"));
    }

    #[test]
    fn local_cache_does_not_need_redis() {
        let env = vars(&[
            ("INSIGHTS_API_KEY", "k"),
            ("UPSTASH_VECTOR_REST_TOKEN", "t"),
            ("OPENROUTER_API_KEY", "o"),
            ("JINA_EMBEDDING_API_KEY", "j"),
        ]);
        let mut config = AppConfig::default();
        config.api.base_url = "https://api.example.com".into();
        config.storage.endpoint_url = "https://blobs.example.com".into();
        config.storage.bucket = "profiles".into();
        config.vector.url = "https://vector.example.com".into();
        config.cache.backend = CacheBackendKind::Local;
        config
            .validate_with(|k| env.get(k).cloned())
            .expect("valid config");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let err = read_secret("NE_TEST_NONEXISTENT_SECRET_12345").unwrap_err();
        assert!(err.to_string().contains("NE_TEST_NONEXISTENT_SECRET_12345"));
    }
}
