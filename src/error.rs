//! Unified error type for arbiterdb.
//!
//! The internal crates report [`arbiter_core::Error`]; this module folds
//! those into a smaller, stable surface for callers of the facade.

use thiserror::Error;

/// All arbiterdb errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine reported its transient "database is locked" condition.
    ///
    /// Surfaced only when a statement hit contention before its retry
    /// loop even started (e.g. on `BEGIN`); retryable.
    #[error("engine busy: {0}")]
    Busy(String),

    /// A statement exhausted its contention retry budget.
    #[error("statement still contended after {attempts} attempts")]
    Contention {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A submitted job failed; the original failure is the source.
    #[error("job '{job}' failed")]
    Job {
        /// Name the job was submitted under.
        job: String,
        /// The failure captured on the worker.
        #[source]
        source: Box<Error>,
    },

    /// A submitted job panicked on its worker thread.
    #[error("job '{job}' panicked: {message}")]
    JobPanicked {
        /// Name the job was submitted under.
        job: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// API misuse: cross-thread connection use or a read-to-write lock
    /// promotion attempt.
    #[error("misuse: {0}")]
    Misuse(String),

    /// The pool was stopped; the submission was rejected without queueing.
    #[error("database is stopped")]
    Stopped,

    /// The engine rejected a statement.
    #[error("engine error: {0}")]
    Engine(String),

    /// Internal error (bug or invariant violation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for arbiterdb operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_) | Error::Contention { .. })
    }

    /// Whether this is a caller mistake rather than a runtime condition.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::Misuse(_))
    }

    /// Whether the database was stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }
}

impl From<arbiter_core::Error> for Error {
    fn from(e: arbiter_core::Error) -> Self {
        use arbiter_core::Error as CoreError;
        match e {
            CoreError::EngineBusy(msg) => Error::Busy(msg),
            CoreError::Contention { attempts } => Error::Contention { attempts },
            CoreError::Engine(msg) => Error::Engine(msg),
            CoreError::Job { job, source } => Error::Job {
                job,
                source: Box::new((*source).into()),
            },
            CoreError::JobPanicked { job, message } => Error::JobPanicked { job, message },
            CoreError::CrossThread {
                what,
                owner,
                caller,
            } => Error::Misuse(format!(
                "{what} owned by thread {owner:?} used from thread {caller:?}"
            )),
            CoreError::LockPromotion => Error::Misuse(
                "cannot promote a read lock to a write lock; take the write lock first"
                    .to_string(),
            ),
            CoreError::PoolStopped => Error::Stopped,
            CoreError::Internal(msg) => Error::Internal(msg),
        }
    }
}
