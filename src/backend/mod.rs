//! Search backend interface
//!
//! The pipeline persists capture documents through a single synchronous
//! "index document" call. Failures split into two categories: connectivity
//! problems the caller may retry, and API-level rejections it must not.

use serde_json::Value;
use thiserror::Error;

pub mod elastic;

pub use elastic::ElasticBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend request timed out: {0}")]
    Timeout(String),

    #[error("Backend connection failed: {0}")]
    Connection(String),

    #[error("Backend rejected request: {0}")]
    Api(String),
}

impl BackendError {
    /// Whether a retry with backoff is worthwhile. Connectivity and timeout
    /// failures are transient; API rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Connection(_))
    }
}

/// A document store that indexes one JSON document at a time.
///
/// `index` blocks until the write completes; callers on an async path must
/// offload it (the persistence worker runs it under `spawn_blocking`).
pub trait IndexBackend: Send + Sync {
    fn index(&self, index: &str, document: &Value) -> Result<(), BackendError>;
}
