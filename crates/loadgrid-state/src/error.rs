//! Error types for LoadGrid.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for collaborator (registry / metrics source) calls.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Errors returned by the instance registry or metrics source.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// Invalid configuration, rejected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("ttl must be greater than zero")]
    ZeroTtl,

    #[error("rate limit policy for {key:?}: {reason}")]
    InvalidPolicy { key: String, reason: String },

    #[error("instance bounds invalid: min {min}, max {max}")]
    InvalidBounds { min: u32, max: u32 },

    #[error("thresholds invalid: scale down {down}, scale up {up}")]
    InvalidThresholds { down: String, up: String },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("unknown region {0:?}")]
    UnknownRegion(String),

    #[error("failed to load config: {0}")]
    Load(String),
}
