//! Engine connection traits
//!
//! The underlying SQL engine is owned by the caller; this module defines
//! the seam the dispatch layer drives it through.
//!
//! A [`Connection`] is one physical handle to the database file. It is
//! never shared between threads: each worker thread creates its own via
//! the [`ConnectionFactory`] when it starts and drops it when it stops.
//! All cross-thread arbitration happens above this trait, in the lock and
//! dispatch layers.
//!
//! Implementations report lock conflicts from the engine (the well-known
//! "database is locked" condition) as [`Error::EngineBusy`] so the command
//! wrapper can apply its bounded retry. Any other engine fault maps to
//! [`Error::Engine`].

use crate::error::Result;
use crate::value::{Row, Value};

#[allow(unused_imports)] // doc links
use crate::error::Error;

/// One physical engine connection.
///
/// Owned by exactly one thread for its whole life. The dispatch layer
/// wraps it in a handle that asserts thread affinity; implementations may
/// assume all calls arrive on the creating thread.
pub trait Connection: 'static {
    /// Execute a non-query statement, returning the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a query, returning all result rows.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Execute a query, returning the first column of the first row.
    ///
    /// Returns `None` when the result set is empty.
    fn query_scalar(&mut self, sql: &str) -> Result<Option<Value>> {
        let rows = self.query(sql)?;
        Ok(rows.into_iter().next().and_then(|row| row.into_iter().next()))
    }

    /// Begin an explicit engine transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the open engine transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open engine transaction.
    fn rollback(&mut self) -> Result<()>;
}

/// Caller-supplied factory for engine connections.
///
/// The pool calls [`connect`](ConnectionFactory::connect) once per worker
/// thread. [`clear_cache`](ConnectionFactory::clear_cache) is invoked when
/// the pool stops or restarts after a schema change, so engine bindings
/// that cache pooled connections per database file can drop them before a
/// reopen; the default is a no-op.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type this factory produces.
    type Conn: Connection;

    /// Open a fresh connection to the database file.
    fn connect(&self) -> Result<Self::Conn>;

    /// Release any engine-level connection cache for this database.
    fn clear_cache(&self) {}
}

impl<C, F> ConnectionFactory for F
where
    C: Connection,
    F: Fn() -> Result<C> + Send + Sync + 'static,
{
    type Conn = C;

    fn connect(&self) -> Result<C> {
        self()
    }
}
