//! Pool errors

use crate::config::ConfigError;

/// Errors returned by pool lifecycle operations
///
/// Submission never fails from the caller's point of view, so none of these
/// come out of `submit`.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// `start` was called on a pool that is already running
    #[error("pool {0} is already started")]
    AlreadyStarted(String),

    /// `start` was called after `stop`
    #[error("pool {0} is stopped")]
    Stopped(String),

    /// Configuration rejected at construction
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
