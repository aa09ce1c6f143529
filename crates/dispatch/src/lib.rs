//! Job dispatch layer for arbiterdb
//!
//! This crate owns the worker threads that talk to the engine and the
//! queue that ferries work to them:
//! - [`WorkerPool`]: the dispatcher, a concurrent FIFO job queue plus a
//!   dynamically sized set of worker threads, each holding one long-lived
//!   connection
//! - [`ConnectionHandle`]: a thread-owned connection wrapper whose
//!   statement methods acquire the transaction lock in the right mode and
//!   retry bounded engine contention
//! - [`JobHandle`]: the caller's side of a submitted job: block on it,
//!   get the result or the captured failure
//! - [`PoolConfig`]: thread bounds, contention retry, warn thresholds

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handle;
pub mod job;
pub mod pool;

pub use config::PoolConfig;
pub use handle::{ConnectionHandle, Transaction};
pub use job::JobHandle;
pub use pool::{PoolStats, WorkerPool};
