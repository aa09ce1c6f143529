//! # arbiterdb
//!
//! A concurrency-safe access layer for an embedded file-based SQL engine.
//!
//! The engine underneath tolerates exactly one thread per connection and
//! exactly one writer at a time. arbiterdb makes that safe to use from a
//! multithreaded program by routing every statement through a worker pool
//! and a reader/writer transaction lock:
//!
//! - a [`Database`] fronts one logical database with a FIFO job queue and
//!   a dynamically sized set of worker threads, each owning one
//!   long-lived connection
//! - jobs declare read or write intent; reads run concurrently, writes
//!   are exclusive, and write intent is serialized before escalation so
//!   two writers can never deadlock against each other
//! - lock sessions are re-entrant per thread, and a job submitting to its
//!   own pool executes inline instead of deadlocking a worker against
//!   itself
//! - statements that hit the engine's transient "database is locked"
//!   condition are retried on a budget before surfacing
//!   [`Error::Contention`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use arbiterdb::prelude::*;
//!
//! let db = Database::open("app.db", factory);
//!
//! db.execute("CREATE TABLE users (name TEXT)")?;
//! db.write_sync("add-user", |conn| {
//!     conn.execute("INSERT INTO users (name) VALUES ('alice')")
//! })?;
//! let rows = db.query("SELECT name FROM users")?;
//!
//! db.stop()?;
//! ```
//!
//! Plug in any engine by implementing [`Connection`] and handing a
//! [`ConnectionFactory`] (a `Fn() -> Result<C>` closure suffices) to
//! [`Database::open`].

#![warn(missing_docs)]

mod database;
mod error;

pub mod prelude;

// Re-export main entry points
pub use database::{Database, DatabaseBuilder, Job};
pub use error::{Error, Result};

// Re-export the engine-facing traits and value types
pub use arbiter_core::{Connection, ConnectionFactory, Row, Value};
pub use arbiter_core::{Error as CoreError, Result as CoreResult};

// Re-export the pieces callers configure or receive in closures
pub use arbiter_dispatch::{ConnectionHandle, PoolConfig, PoolStats, Transaction};
pub use arbiter_lock::{LockConfig, LockRegistry};
