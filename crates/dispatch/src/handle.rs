//! Thread-owned connection wrapper and statement retry
//!
//! A [`ConnectionHandle`] owns exactly one engine connection and the
//! [`TransactionLock`] session arbitrating it. It records its owning
//! thread at creation; every entry point asserts the caller is that
//! thread, because the underlying engine connection tolerates exactly one
//! thread for its whole life.
//!
//! Statement methods acquire the lock in the correct mode, bracket the
//! statement for the watchdog, and retry a bounded number of times when
//! the engine reports its "database is locked" condition; in-process
//! locking cannot prevent contention from other processes touching the
//! same file. Exhausting the budget surfaces [`Error::Contention`], a
//! distinct kind from anything a caller's closure can produce.

use arbiter_core::{Connection, Error, Result, Row, Value};
use arbiter_lock::{LockArbiter, TransactionLock, WriterGuard};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

use crate::config::PoolConfig;

/// One worker thread's connection, lock session, and retry policy.
pub struct ConnectionHandle<C: Connection> {
    conn: RefCell<C>,
    lock: TransactionLock,
    owner: ThreadId,
    busy_attempts: u32,
    busy_backoff: std::time::Duration,
    /// True while an explicit transaction owns the writer lock.
    in_transaction: Cell<bool>,
}

impl<C: Connection> ConnectionHandle<C> {
    /// Wrap a freshly opened connection on the current thread.
    pub fn new(conn: C, arbiter: Arc<LockArbiter>, config: &PoolConfig) -> Self {
        Self {
            conn: RefCell::new(conn),
            lock: TransactionLock::new(arbiter),
            owner: thread::current().id(),
            busy_attempts: config.busy_attempts.max(1),
            busy_backoff: config.busy_backoff(),
            in_transaction: Cell::new(false),
        }
    }

    /// The lock session arbitrating this connection.
    pub fn lock(&self) -> &TransactionLock {
        &self.lock
    }

    fn check_owner(&self) -> Result<()> {
        let caller = thread::current().id();
        if caller != self.owner {
            return Err(Error::CrossThread {
                what: "connection handle",
                owner: self.owner,
                caller,
            });
        }
        Ok(())
    }

    /// Run one statement attempt loop under the already-held lock.
    ///
    /// The connection is borrowed per attempt, never across the backoff
    /// sleep, so nothing holds it while this thread naps.
    fn with_busy_retry<T>(&self, sql: &str, mut f: impl FnMut(&mut C) -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = f(&mut self.conn.borrow_mut());
            match outcome {
                Err(e) if e.is_busy() => {
                    if attempt >= self.busy_attempts {
                        warn!(
                            sql,
                            attempts = attempt,
                            "giving up on contended statement"
                        );
                        return Err(Error::Contention { attempts: attempt });
                    }
                    debug!(sql, attempt, "engine busy, retrying statement");
                    thread::sleep(self.busy_backoff);
                }
                other => return other,
            }
        }
    }

    /// Execute a query under the read lock, returning all rows.
    pub fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.check_owner()?;
        let _read = self.lock.open_reader()?;
        let _cmd = self.lock.begin_command(sql)?;
        self.with_busy_retry(sql, |conn| conn.query(sql))
    }

    /// Execute a query under the read lock, returning the first column
    /// of the first row.
    pub fn query_scalar(&self, sql: &str) -> Result<Option<Value>> {
        self.check_owner()?;
        let _read = self.lock.open_reader()?;
        let _cmd = self.lock.begin_command(sql)?;
        self.with_busy_retry(sql, |conn| conn.query_scalar(sql))
    }

    /// Execute a non-query statement.
    ///
    /// Inside an explicit [`Transaction`] the transaction already owns
    /// the writer lock; otherwise the writer lock brackets this single
    /// statement.
    pub fn execute(&self, sql: &str) -> Result<u64> {
        self.check_owner()?;
        if self.in_transaction.get() {
            let _cmd = self.lock.begin_command(sql)?;
            return self.with_busy_retry(sql, |conn| conn.execute(sql));
        }
        let _write = self.lock.open_writer()?;
        let _cmd = self.lock.begin_command(sql)?;
        self.with_busy_retry(sql, |conn| conn.execute(sql))
    }

    /// Begin an explicit transaction.
    ///
    /// The writer lock is acquired once here and held until the returned
    /// guard commits, rolls back, or drops (drop rolls back).
    pub fn begin_transaction(&self) -> Result<Transaction<'_, C>> {
        self.check_owner()?;
        if self.in_transaction.get() {
            return Err(Error::Internal(
                "transaction already open on this connection".to_string(),
            ));
        }
        let write = self.lock.open_writer()?;
        self.with_busy_retry("BEGIN", |conn| conn.begin())?;
        self.in_transaction.set(true);
        Ok(Transaction {
            handle: self,
            _write: write,
            finished: Cell::new(false),
        })
    }
}

/// RAII explicit transaction owning the writer lock for its duration.
pub struct Transaction<'a, C: Connection> {
    handle: &'a ConnectionHandle<C>,
    _write: WriterGuard<'a>,
    finished: Cell<bool>,
}

impl<C: Connection> Transaction<'_, C> {
    /// Commit and release the writer lock.
    pub fn commit(self) -> Result<()> {
        self.finished.set(true);
        self.handle.in_transaction.set(false);
        self.handle.conn.borrow_mut().commit()
    }

    /// Roll back and release the writer lock.
    pub fn rollback(self) -> Result<()> {
        self.finished.set(true);
        self.handle.in_transaction.set(false);
        self.handle.conn.borrow_mut().rollback()
    }
}

impl<C: Connection> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if !self.finished.get() {
            self.handle.in_transaction.set(false);
            if let Err(e) = self.handle.conn.borrow_mut().rollback() {
                warn!(error = %e, "implicit rollback failed");
            }
        }
    }
}
