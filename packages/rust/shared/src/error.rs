//! Error types for the node enricher.
//!
//! Library crates use [`EnricherError`] via `thiserror`.
//! The CLI app wraps startup failures with `color-eyre`; pipeline failures are
//! turned into a structured response and never escape as panics or eyre reports.

use std::path::PathBuf;

/// How an API call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Transient failures (timeouts, 5xx, resets) outlasted the retry budget.
    Unavailable,
    /// The server answered with a non-retryable status.
    Rejected { status: u16, body: String },
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Rejected { status, body } => {
                let body = body.trim();
                if body.is_empty() {
                    write!(f, "rejected with HTTP {status}")
                } else {
                    write!(f, "rejected with HTTP {status}: {}", truncate(body, 300))
                }
            }
        }
    }
}

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum EnricherError {
    /// A call through the REST client failed.
    #[error("api error on {path}: {kind}")]
    Api { path: String, kind: ApiErrorKind },

    /// The node has no usable source HTML.
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    /// The generation provider failed or returned unusable output.
    #[error("generation error: {0}")]
    Generation(String),

    /// Embedding or vector index maintenance failed (non-fatal).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Duplicate search failed (non-fatal).
    #[error("dedup search error: {0}")]
    DedupSearch(String),

    /// The scraped profile is too sparse to describe.
    #[error("Empty profile detected: {0}")]
    EmptyProfile(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// HTML or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Local cache storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The invocation payload could not be understood.
    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnricherError>;

impl EnricherError {
    /// Create an API error for the given path.
    pub fn api(path: impl Into<String>, kind: ApiErrorKind) -> Self {
        Self::Api {
            path: path.into(),
            kind,
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the pipeline run.
    ///
    /// Embedding and dedup-search failures degrade the run instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Embedding(_) | Self::DedupSearch(_))
    }

    /// HTTP status of a rejected API call, if this is one.
    pub fn rejected_status(&self) -> Option<u16> {
        match self {
            Self::Api {
                kind: ApiErrorKind::Rejected { status, .. },
                ..
            } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is an API call that exhausted its retries.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Api {
                kind: ApiErrorKind::Unavailable,
                ..
            }
        )
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
