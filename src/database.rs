//! Main database entry point.
//!
//! This module provides the [`Database`] struct, the primary entry point
//! for running work against an engine database through the worker pool.

use crate::error::{Error, Result};
use arbiter_core::ConnectionFactory;
use arbiter_dispatch::{ConnectionHandle, JobHandle, PoolConfig, PoolStats, WorkerPool};
use arbiter_lock::{LockConfig, LockRegistry};
use std::sync::Arc;
use tracing::info;

/// Default slow-job warn threshold, in milliseconds.
const DEFAULT_WARN_AFTER_MS: u64 = 10_000;

/// A database accessed through a worker pool.
///
/// All engine work runs on pool-owned worker threads, each with its own
/// long-lived connection, under the reader/writer transaction lock. The
/// caller never touches a connection directly except inside a submitted
/// closure.
///
/// # Example
///
/// ```ignore
/// use arbiterdb::prelude::*;
///
/// let db = Database::builder("app.db", factory).open();
///
/// let names = db.read_sync("load-names", |conn| {
///     conn.query("SELECT name FROM users")
/// })?;
///
/// db.write_sync("add-user", |conn| {
///     conn.execute("INSERT INTO users (name) VALUES ('alice')")
/// })?;
///
/// db.stop()?;
/// ```
pub struct Database<F: ConnectionFactory> {
    name: String,
    pool: WorkerPool<F>,
    registry: Arc<LockRegistry>,
    /// True when the builder created the registry for this database
    /// alone. A caller-shared registry is never purged here: siblings
    /// under the same name must keep resolving to the same arbiter.
    owns_registry: bool,
    warn_after_ms: Option<u64>,
}

impl<F: ConnectionFactory> Database<F> {
    /// Open a database under its logical name with default settings.
    ///
    /// No connection is opened until the first job is submitted.
    pub fn open(name: impl Into<String>, factory: F) -> Self {
        Self::builder(name, factory).open()
    }

    /// Create a builder for database configuration.
    pub fn builder(name: impl Into<String>, factory: F) -> DatabaseBuilder<F> {
        DatabaseBuilder::new(name, factory)
    }

    /// The logical database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a read job on a worker and block for its result.
    ///
    /// The closure runs under the shared read lock; concurrent reads
    /// proceed in parallel, writes are excluded for the duration.
    pub fn read_sync<T, J>(&self, job: &str, f: J) -> Result<T>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> arbiter_core::Result<T> + Send + 'static,
    {
        self.pool
            .read_sync(job, self.warn_after_ms, f)
            .map_err(Error::from)
    }

    /// Run a write job on a worker and block for its result.
    ///
    /// The closure runs under the exclusive write lock.
    pub fn write_sync<T, J>(&self, job: &str, f: J) -> Result<T>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> arbiter_core::Result<T> + Send + 'static,
    {
        self.pool
            .write_sync(job, self.warn_after_ms, f)
            .map_err(Error::from)
    }

    /// Submit a read job without blocking.
    pub fn read_async<T, J>(&self, job: &str, f: J) -> Result<Job<T>>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> arbiter_core::Result<T> + Send + 'static,
    {
        let inner = self.pool.read_async(job, f).map_err(Error::from)?;
        Ok(Job {
            inner,
            warn_after_ms: self.warn_after_ms,
        })
    }

    /// Submit a write job without blocking.
    pub fn write_async<T, J>(&self, job: &str, f: J) -> Result<Job<T>>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> arbiter_core::Result<T> + Send + 'static,
    {
        let inner = self.pool.write_async(job, f).map_err(Error::from)?;
        Ok(Job {
            inner,
            warn_after_ms: self.warn_after_ms,
        })
    }

    /// Execute one statement under the write lock.
    pub fn execute(&self, sql: &str) -> Result<u64> {
        let owned = sql.to_string();
        self.write_sync(sql, move |conn| conn.execute(&owned))
    }

    /// Run one query under the read lock, returning all rows.
    pub fn query(&self, sql: &str) -> Result<Vec<arbiter_core::Row>> {
        let owned = sql.to_string();
        self.read_sync(sql, move |conn| conn.query(&owned))
    }

    /// Run one query under the read lock, returning the first column of
    /// the first row.
    pub fn query_scalar(&self, sql: &str) -> Result<Option<arbiter_core::Value>> {
        let owned = sql.to_string();
        self.read_sync(sql, move |conn| conn.query_scalar(&owned))
    }

    /// Switch the pool between single- and multithreaded operation.
    ///
    /// Blocking: the queue drains and every worker stops before the pool
    /// relaunches in the new mode.
    pub fn set_multithreaded(&self, on: bool) -> Result<()> {
        self.pool.set_multithreaded(on).map_err(Error::from)
    }

    /// Tear down all workers and relaunch the minimum thread set.
    ///
    /// Required after a schema reorg: connections opened before the reorg
    /// must not be reused. Cached engine state is cleared in between.
    pub fn clear_down_restart(&self) -> Result<()> {
        info!(db = %self.name, "clear-down restart");
        self.pool.clear_down_restart().map_err(Error::from)
    }

    /// Stop the database.
    ///
    /// New submissions fail immediately; already-queued jobs finish, then
    /// every worker exits and cached engine state is released. When this
    /// database owns its registry the arbiter entry is purged too (with a
    /// leak warning if any lock hold is still outstanding); a shared
    /// registry is left untouched, since other databases under the same
    /// name must keep resolving to the same arbiter. Purging a shared
    /// registry is its owner's call.
    pub fn stop(&self) -> Result<()> {
        info!(db = %self.name, "stopping database");
        self.pool.stop().map_err(Error::from)?;
        if self.owns_registry {
            self.registry.purge(&self.name);
        }
        Ok(())
    }

    /// Snapshot the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The registry this database's lock arbiter lives in.
    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }
}

/// Caller's side of an asynchronously submitted job.
#[derive(Debug)]
pub struct Job<T> {
    inner: JobHandle<T>,
    warn_after_ms: Option<u64>,
}

impl<T> Job<T> {
    /// Diagnostic name this job was submitted under.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Whether the worker has finished this job.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Block until the job completes and return its result.
    pub fn join(self) -> Result<T> {
        self.inner.join(self.warn_after_ms).map_err(Error::from)
    }
}

/// Builder for [`Database`] configuration.
pub struct DatabaseBuilder<F: ConnectionFactory> {
    name: String,
    factory: F,
    pool_config: PoolConfig,
    lock_config: LockConfig,
    registry: Option<Arc<LockRegistry>>,
    warn_after_ms: Option<u64>,
}

impl<F: ConnectionFactory> DatabaseBuilder<F> {
    fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            pool_config: PoolConfig::default(),
            lock_config: LockConfig::default(),
            registry: None,
            warn_after_ms: Some(DEFAULT_WARN_AFTER_MS),
        }
    }

    /// Set the worker pool configuration.
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the transaction lock configuration.
    ///
    /// Ignored when a shared [`registry`](Self::registry) is supplied;
    /// the registry's own config governs every arbiter it creates.
    pub fn lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Share a lock registry with other databases.
    ///
    /// Databases opened under the same name in the same registry share
    /// one lock arbiter, which is what makes the locking correct when
    /// several pools front the same underlying file.
    pub fn registry(mut self, registry: Arc<LockRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Warn threshold for slow jobs, `None` to disable.
    pub fn warn_after_ms(mut self, ms: Option<u64>) -> Self {
        self.warn_after_ms = ms;
        self
    }

    /// Open the database.
    ///
    /// Workers (and therefore connections) start lazily on the first
    /// submitted job.
    pub fn open(self) -> Database<F> {
        let (registry, owns_registry) = match self.registry {
            Some(registry) => (registry, false),
            None => (Arc::new(LockRegistry::new(self.lock_config)), true),
        };
        let arbiter = registry.arbiter_for(&self.name);
        let pool = WorkerPool::new(self.name.clone(), self.factory, self.pool_config, arbiter);
        info!(db = %self.name, "database opened");
        Database {
            name: self.name,
            pool,
            registry,
            owns_registry,
            warn_after_ms: self.warn_after_ms,
        }
    }
}
