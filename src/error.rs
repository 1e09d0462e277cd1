//! Error types for cache operations
//!
//! This module defines the error taxonomy shared by every cache component.
//! Store failures are split into transient ones (network, timeout) that a
//! strategy may retry, and fatal ones (serialization) that surface immediately.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Network or connection failure talking to the remote store
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Remote store operation exceeded its configured timeout
    #[error("Store operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid construction arguments
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied loader or writer failed
    #[error("Origin error: {0}")]
    Origin(String),

    /// Write-behind op exhausted its retries
    #[error("Write failure for key {key} after {attempts} attempts: {reason}")]
    WriteFailure {
        key: String,
        attempts: u32,
        reason: String,
    },

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Whether the calling strategy may retry the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CacheError::TransientStore(_) | CacheError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(e: anyhow::Error) -> Self {
        CacheError::Origin(format!("{:#}", e))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        match e.kind() {
            redis::ErrorKind::TypeError => CacheError::Serialization(e.to_string()),
            _ => CacheError::TransientStore(e.to_string()),
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::TransientStore(format!("connection pool: {}", e))
    }
}

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
