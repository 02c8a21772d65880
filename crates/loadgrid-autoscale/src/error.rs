//! Autoscaler error types.

use thiserror::Error;

use loadgrid_state::ConfigError;

/// Errors surfaced by scale and distribute operations.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// A collaborator call failed or exceeded the registry timeout. The pool
    /// is unchanged.
    #[error("registry unavailable during {op}: {reason}")]
    RegistryUnavailable { op: &'static str, reason: String },

    #[error("invalid autoscaler configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
