//! Error types for tagcache operations

use thiserror::Error;

/// Backend (key-value store) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,

    #[error("Backend I/O error: {reason}")]
    Io { reason: String },
}

/// Envelope encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode value for key {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode value for key {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Caller input errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Key {key} uses reserved prefix {prefix}")]
    ReservedKey { key: String, prefix: String },

    #[error("Cache keys must not be empty")]
    EmptyKey,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all tagcache errors.
#[derive(Debug, Clone, Error)]
pub enum TagCacheError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for tagcache operations.
pub type TagCacheResult<T> = Result<T, TagCacheError>;

// =============================================================================
// TESTS
// =============================================================================
