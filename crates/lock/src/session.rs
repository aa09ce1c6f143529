//! Per-connection lock sessions
//!
//! A [`TransactionLock`] is the view one connection has onto its shared
//! [`LockArbiter`]. It is created on the thread that owns the connection
//! and must stay there; every entry point asserts the caller is the
//! owning thread and fails fast otherwise.
//!
//! The session, not the arbiter, tracks re-entrancy: a thread that
//! already holds compatible access gets an unarmed guard back instead of
//! blocking on the primitive again, and only the outermost guard releases
//! on drop. Promotion of a held read lock to a write lock is rejected
//! outright: it is the classic promotion deadlock and has no safe
//! resolution.

use arbiter_core::{Error, Result};
use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::arbiter::LockArbiter;

/// A per-connection, thread-affine session over a shared arbiter.
#[derive(Debug)]
pub struct TransactionLock {
    arbiter: Arc<LockArbiter>,
    owner: ThreadId,
    /// Nesting depth of open reader guards (including ones riding a
    /// held write lock).
    read_depth: Cell<u32>,
    /// Nesting depth of open writer guards.
    write_depth: Cell<u32>,
}

impl TransactionLock {
    /// Create a session owned by the calling thread.
    pub fn new(arbiter: Arc<LockArbiter>) -> Self {
        Self {
            arbiter,
            owner: thread::current().id(),
            read_depth: Cell::new(0),
            write_depth: Cell::new(0),
        }
    }

    /// The arbiter this session coordinates through.
    pub fn arbiter(&self) -> &Arc<LockArbiter> {
        &self.arbiter
    }

    /// Whether this session currently holds read access.
    pub fn holds_read(&self) -> bool {
        self.read_depth.get() > 0 || self.holds_write()
    }

    /// Whether this session currently holds the write lock.
    pub fn holds_write(&self) -> bool {
        self.write_depth.get() > 0
    }

    fn check_owner(&self) -> Result<()> {
        let caller = thread::current().id();
        if caller != self.owner {
            return Err(Error::CrossThread {
                what: "lock session",
                owner: self.owner,
                caller,
            });
        }
        Ok(())
    }

    /// Open read access, short-circuiting if already held.
    ///
    /// Dropping the returned guard closes the reader. A session holding
    /// the write lock gets an unarmed guard: write access covers reads.
    pub fn open_reader(&self) -> Result<ReaderGuard<'_>> {
        self.check_owner()?;
        let armed = self.read_depth.get() == 0 && self.write_depth.get() == 0;
        if armed {
            self.arbiter.acquire_shared();
        }
        self.read_depth.set(self.read_depth.get() + 1);
        Ok(ReaderGuard { lock: self, armed })
    }

    /// Open the write lock, short-circuiting if already held.
    ///
    /// Goes through the upgradeable slot first, then escalates, so two
    /// writer-intents queue on the slot instead of deadlocking each
    /// other waiting for readers. Calling this while the session holds a
    /// read lock is invalid and fails with [`Error::LockPromotion`].
    pub fn open_writer(&self) -> Result<WriterGuard<'_>> {
        self.check_owner()?;
        if self.write_depth.get() > 0 {
            self.write_depth.set(self.write_depth.get() + 1);
            return Ok(WriterGuard { lock: self, armed: false });
        }
        if self.read_depth.get() > 0 {
            return Err(Error::LockPromotion);
        }
        self.arbiter.acquire_upgradeable();
        self.arbiter.escalate();
        self.write_depth.set(1);
        Ok(WriterGuard { lock: self, armed: true })
    }

    /// Record the statement about to execute, for watchdog diagnostics.
    pub fn begin_command(&self, text: &str) -> Result<CommandGuard<'_>> {
        self.check_owner()?;
        self.arbiter.begin_command(text);
        Ok(CommandGuard { lock: self })
    }
}

/// Scoped read access; releases on drop if this was the outermost open.
pub struct ReaderGuard<'a> {
    lock: &'a TransactionLock,
    armed: bool,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let depth = self.lock.read_depth.get();
        debug_assert!(depth > 0);
        self.lock.read_depth.set(depth - 1);
        if self.armed {
            self.lock.arbiter.release_shared();
        }
    }
}

/// Scoped write access; releases (write lock and upgradeable slot both)
/// on drop if this was the outermost open.
#[derive(Debug)]
pub struct WriterGuard<'a> {
    lock: &'a TransactionLock,
    armed: bool,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let depth = self.lock.write_depth.get();
        debug_assert!(depth > 0);
        self.lock.write_depth.set(depth - 1);
        if self.armed {
            self.lock.arbiter.release_write();
        }
    }
}

/// Scoped command diagnostics bracket.
pub struct CommandGuard<'a> {
    lock: &'a TransactionLock,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.lock.arbiter.end_command();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::LockConfig;

    fn session() -> TransactionLock {
        TransactionLock::new(LockArbiter::new(
            "test",
            LockConfig::default().acquire_retry_ms(20).warn_after_ms(None),
        ))
    }

    #[test]
    fn reader_reentrancy_releases_once() {
        let lock = session();
        {
            let _outer = lock.open_reader().unwrap();
            assert_eq!(lock.arbiter().outstanding_holds(), 1);
            {
                let _inner = lock.open_reader().unwrap();
                // Inner open must not touch the arbiter again.
                assert_eq!(lock.arbiter().outstanding_holds(), 1);
            }
            assert!(lock.holds_read(), "inner drop must not release the outer hold");
        }
        assert!(!lock.holds_read());
        assert_eq!(lock.arbiter().outstanding_holds(), 0);
    }

    #[test]
    fn writer_reentrancy_releases_once() {
        let lock = session();
        {
            let _outer = lock.open_writer().unwrap();
            let _inner = lock.open_writer().unwrap();
            assert!(lock.holds_write());
            assert_eq!(lock.arbiter().outstanding_holds(), 1);
        }
        assert!(!lock.holds_write());
        assert_eq!(lock.arbiter().outstanding_holds(), 0);
    }

    #[test]
    fn read_under_write_is_free() {
        let lock = session();
        let _w = lock.open_writer().unwrap();
        let _r = lock.open_reader().unwrap();
        // The write hold covers reads; no second arbiter acquisition.
        assert_eq!(lock.arbiter().outstanding_holds(), 1);
    }

    #[test]
    fn promotion_is_rejected() {
        let lock = session();
        let _r = lock.open_reader().unwrap();
        let err = lock.open_writer().unwrap_err();
        assert!(matches!(err, Error::LockPromotion));
        // The read hold is untouched by the failed promotion.
        assert!(lock.holds_read());
    }

    #[test]
    fn cross_thread_use_is_rejected() {
        // A session moved off its creating thread must refuse every
        // entry point rather than corrupt the arbiter state silently.
        let lock = session();
        let result = std::thread::spawn(move || lock.open_reader().map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(Error::CrossThread { .. })));
    }

    #[test]
    fn command_guard_clears_on_drop() {
        let lock = session();
        let _r = lock.open_reader().unwrap();
        {
            let _cmd = lock.begin_command("SELECT 1").unwrap();
        }
        // A second bracket on the same thread must be accepted.
        let _cmd = lock.begin_command("SELECT 2").unwrap();
    }
}
