//! Error types for cache operations
//!
//! Store backends report failures through [`CacheError`]. The cache layers
//! above the store catch these at every call site and degrade to uncached
//! behaviour, so callers of the high-level API rarely see them.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Store unavailable or a store command failed
    #[error("Store error: {0}")]
    StoreError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid key pattern passed to a pattern scan
    #[error("Invalid key pattern '{pattern}': {reason}")]
    PatternError { pattern: String, reason: String },

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

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
