//! Convenient imports for arbiterdb.
//!
//! Re-exports the types most programs need so you can get started with a
//! single import:
//!
//! ```ignore
//! use arbiterdb::prelude::*;
//!
//! let db = Database::open("app.db", factory);
//! db.execute("INSERT INTO t VALUES (1)")?;
//! ```

// Main entry point
pub use crate::database::{Database, DatabaseBuilder, Job};

// Error handling
pub use crate::error::{Error, Result};

// Engine integration traits and value types
pub use arbiter_core::{Connection, ConnectionFactory, Row, Value};

// Closure-side connection surface and configuration
pub use arbiter_dispatch::{ConnectionHandle, PoolConfig, Transaction};
pub use arbiter_lock::{LockConfig, LockRegistry};
