//! Canonical error types for arbiterdb
//!
//! The taxonomy distinguishes four classes of failure:
//! - **Engine contention**: the underlying "database is locked" condition.
//!   [`Error::EngineBusy`] is the raw engine report and is retried locally;
//!   [`Error::Contention`] is surfaced once the bounded retry is exhausted.
//! - **Job failure**: anything a user closure returns or panics with.
//!   Always captured, never kills a worker, surfaced at join time wrapped
//!   in [`Error::Job`] so the cause chain is preserved.
//! - **Misuse**: cross-thread use of a thread-owned object or an attempted
//!   read-to-write lock promotion. Programming errors; they fail fast.
//! - **Shutdown**: submitting work after the pool began stopping.
//!
//! Contention exhaustion and caller failure are deliberately distinct
//! kinds: a caller can retry a `Contention` with fresh state, while a
//! `Job` error means its own closure failed.

use std::thread::ThreadId;
use thiserror::Error;

/// All arbiterdb errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine reported a lock conflict for a single statement.
    ///
    /// This is the raw, well-known "database is locked" condition from the
    /// underlying engine. The command wrapper retries it a bounded number
    /// of times before giving up with [`Error::Contention`].
    #[error("engine busy: {0}")]
    EngineBusy(String),

    /// Bounded contention retry was exhausted.
    #[error("statement still contended after {attempts} attempts")]
    Contention {
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// Any other fault reported by the underlying engine.
    #[error("engine error: {0}")]
    Engine(String),

    /// A job's closure returned an error.
    ///
    /// The original failure is preserved as the source so callers can walk
    /// the cause chain.
    #[error("job '{job}' failed")]
    Job {
        /// Diagnostic name the job was submitted under
        job: String,
        /// The failure returned by the job's closure
        #[source]
        source: Box<Error>,
    },

    /// A job's closure panicked on the worker thread.
    ///
    /// The worker survives; the panic payload is captured here.
    #[error("job '{job}' panicked: {message}")]
    JobPanicked {
        /// Diagnostic name the job was submitted under
        job: String,
        /// Stringified panic payload
        message: String,
    },

    /// A thread-owned object was entered from a foreign thread.
    ///
    /// Connection handles and lock sessions record their owning thread at
    /// creation; touching them from any other thread is a programming
    /// error, not a recoverable condition.
    #[error("cross-thread use of {what}: owned by {owner:?}, called from {caller:?}")]
    CrossThread {
        /// What was misused (e.g. "connection handle", "lock session")
        what: &'static str,
        /// Thread that owns the object
        owner: ThreadId,
        /// Thread that made the call
        caller: ThreadId,
    },

    /// A session holding a read lock tried to open the write lock.
    ///
    /// Promoting a held read lock is the classic promotion deadlock; it is
    /// rejected outright rather than resolved.
    #[error("cannot promote a held read lock to a write lock")]
    LockPromotion,

    /// Work was submitted after the pool began stopping.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// Bug or invariant violation inside the dispatch layer itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for arbiterdb operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable with fresh state.
    ///
    /// Only the raw engine busy report is retryable; once it has been
    /// promoted to [`Error::Contention`] the local retry budget is spent.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::EngineBusy(_))
    }

    /// Check if this error represents misuse (a programming error).
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::CrossThread { .. } | Error::LockPromotion)
    }

    /// Check if this error came out of a job's own closure.
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Error::Job { .. } | Error::JobPanicked { .. })
    }

    /// Wrap a closure failure in the dispatcher error kind.
    pub fn job(name: impl Into<String>, source: Error) -> Self {
        Error::Job {
            job: name.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn job_error_preserves_cause_chain() {
        let inner = Error::Engine("boom".to_string());
        let wrapped = Error::job("append", inner);

        let source = wrapped.source().expect("job error must carry a source");
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn busy_is_retryable_but_contention_is_not() {
        assert!(Error::EngineBusy("locked".into()).is_busy());
        assert!(!Error::Contention { attempts: 3 }.is_busy());
    }

    #[test]
    fn misuse_classification() {
        assert!(Error::LockPromotion.is_misuse());
        assert!(!Error::PoolStopped.is_misuse());
    }
}
