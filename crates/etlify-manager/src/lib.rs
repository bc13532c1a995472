//! Job Layer (spec.md §4.7): enqueue deduplication via a TTL
//! write-if-absent cache, fixed-delay bounded retry, and worker dispatch
//! into `etlify_core::Synchronizer`.
//!
//! This crate is the one concrete `etlify_core::Enqueuer` a host wires
//! into its `EngineContext`; `etlify-core` itself never depends on it
//! (spec.md §9's "no hidden process-wide state" — the dependency runs
//! one way, core -> manager never).

#![allow(unknown_lints)]

pub mod cache;
pub mod enqueuer;
pub mod error;
pub mod lock;
pub mod queue;
pub mod retry;
pub mod worker;

pub use cache::{CacheStore, InMemoryCacheStore};
pub use enqueuer::JobEnqueuer;
pub use error::{ManagerError, Result};
pub use lock::{enqueue_lock_key, MIN_LOCK_TTL};
pub use queue::{InMemoryJobBackend, InMemoryJobReceiver, JobArgs, JobBackend};
pub use retry::RetryPolicy;
pub use worker::JobWorker;
