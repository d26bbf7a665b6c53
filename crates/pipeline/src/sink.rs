//! Sink traits
//!
//! The pools know nothing about where work ends up. The application supplies
//! a [`DeleteSink`] (usually the URL store) and an [`AuditSink`] (file or HTTP
//! collector, see [`crate::sinks`]).

use async_trait::async_trait;

use crate::model::{AuditEvent, Task};

/// Errors a sink can report
///
/// The pools log these and drop the affected work; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure talking to a remote collector
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote collector answered with a non-success status
    #[error("unexpected status code: {0}")]
    Status(u16),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink was already closed
    #[error("sink is closed")]
    Closed,

    /// The call did not finish within the pool's sink timeout
    #[error("sink call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Any other failure from an application-supplied sink
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Applies batches of deletions
///
/// Called concurrently from independent flush dispatches; re-applying the
/// same task must be harmless.
#[async_trait]
pub trait DeleteSink: Send + Sync {
    /// Apply one batch of deletions
    async fn apply(&self, batch: Vec<Task>) -> Result<(), SinkError>;
}

/// Persists audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist a single event
    async fn send(&self, event: &AuditEvent) -> Result<(), SinkError>;

    /// Release resources, called once after every worker has exited
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
