//! # Shortener Pipeline
//!
//! Background processing for the URL shortener: deferred bulk deletion of
//! user records and best-effort delivery of audit events.
//!
//! ## Features
//!
//! - **Drop-on-full ingestion**: submitting work never blocks the HTTP handler that calls it
//! - **Time/size batching**: deletion tasks are grouped before hitting the store
//! - **Backlog-driven scaling**: workers are added while a backlog exists, up to a cap
//! - **Graceful drain**: `stop` pushes buffered work through the sink before returning
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   try_send   ┌───────────────┐  expand  ┌──────────────┐
//! │ DeletePool   │ ───────────▶ │ request queue │ ───────▶ │  task queue  │
//! │  ::submit    │  (drop full) │  (N workers)  │          │  (batcher)   │
//! └──────────────┘              └───────────────┘          └──────┬───────┘
//!                                                                 │ size / tick
//!                                                                 ▼
//!                                                     ┌──────────────────────┐
//!                                                     │ DeleteSink::apply    │
//!                                                     │ (tracked dispatch)   │
//!                                                     └──────────────────────┘
//!
//! ┌──────────────┐   try_send   ┌───────────────┐         ┌──────────────────┐
//! │ AuditPool    │ ───────────▶ │  event queue  │ ──────▶ │ AuditSink::send  │
//! │  ::submit    │  (drop full) │  (N workers)  │         │                  │
//! └──────────────┘              └───────────────┘         └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use shortener_pipeline::prelude::*;
//!
//! let pool = DeletePool::new(store, DeletePoolConfig::default().with_batch_size(20))?;
//! pool.start(&shutdown).await?;
//!
//! pool.submit(DeletionRequest::new("user-1", vec!["abc".into(), "def".into()]));
//!
//! // Graceful shutdown, flushes whatever is still buffered
//! pool.stop().await;
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod pool;
pub mod sink;
pub mod sinks;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{AuditPoolConfig, ConfigError, DeletePoolConfig};
    pub use crate::error::PoolError;
    pub use crate::model::{AuditAction, AuditEvent, DeletionRequest, Task};
    pub use crate::pool::{AuditPool, DeletePool, PoolStatus};
    pub use crate::sink::{AuditSink, DeleteSink, SinkError};
    pub use crate::sinks::{AuditSinkConfig, FileAuditSink, HttpAuditSink};
}

// Re-export key types at crate root
pub use config::{AuditPoolConfig, ConfigError, DeletePoolConfig};
pub use error::PoolError;
pub use model::{AuditAction, AuditEvent, DeletionRequest, Task};
pub use pool::{AuditPool, DeletePool, PoolStatus};
pub use sink::{AuditSink, DeleteSink, SinkError};
pub use sinks::{AuditSinkConfig, FileAuditSink, HttpAuditSink};
