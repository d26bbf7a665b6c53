//! Worker pools feeding the sinks
//!
//! This module provides:
//! - [`DeletePool`] - expands deletion requests and applies them in batches
//! - [`AuditPool`] - delivers audit events one at a time
//! - [`PoolStatus`] - lifecycle state shared by both pools
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Pool                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Scaler    │  │  Batcher    │  │  Lifecycle          │  │
//! │  │   (5s)      │  │ (size/tick) │  │  (stop once, drain) │  │
//! │  └──────┬──────┘  └─────────────┘  └─────────────────────┘  │
//! │         │ backlog > 0 && active < max                        │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │             WorkerSlots (atomic, capped)             │    │
//! │  │  [Worker 1] [Worker 2] ... [Worker max]              │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers are only ever added. A pool grows to `max_workers` under sustained
//! backlog and keeps that many workers until it is stopped.

mod audit;
mod batcher;
mod delete;
mod lifecycle;
mod scaler;

pub use audit::AuditPool;
pub use delete::DeletePool;
pub use lifecycle::PoolStatus;
