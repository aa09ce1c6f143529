//! Jobs and their completion signalling
//!
//! A job is a unit of deferred work: the caller keeps a [`JobHandle`] and
//! the worker keeps the matching [`JobSlot`]. The worker fills the slot
//! exactly once (result or captured failure plus execution time) and
//! signals the condvar; the caller blocks in [`JobHandle::join`] until
//! then.
//!
//! Failures never escape the worker thread: closure errors are stored and
//! rethrown at join time wrapped in the dispatcher error kind, panics are
//! caught by the executor and stored as [`Error::JobPanicked`].

use arbiter_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Caller's side of a submitted job.
///
/// Await it with [`join`](JobHandle::join); dropping it without joining
/// is allowed; the job still runs to completion on its worker.
#[derive(Debug)]
pub struct JobHandle<T> {
    slot: Arc<JobSlot<T>>,
    name: String,
    submitted: Instant,
    /// Submission site, logged when the job turns out slow. Captured via
    /// `Backtrace::capture`, so it is only populated when backtraces are
    /// enabled in the environment.
    submit_site: Backtrace,
}

/// Worker's side: the shared completion slot.
#[derive(Debug)]
pub(crate) struct JobSlot<T> {
    state: Mutex<SlotState<T>>,
    done: Condvar,
}

#[derive(Debug)]
enum SlotState<T> {
    Pending,
    Finished {
        result: Result<T>,
        execution: Duration,
    },
    Taken,
}

impl<T> JobHandle<T> {
    /// Create a handle and its worker-side slot.
    pub(crate) fn new(name: impl Into<String>) -> (Self, Arc<JobSlot<T>>) {
        let slot = Arc::new(JobSlot {
            state: Mutex::new(SlotState::Pending),
            done: Condvar::new(),
        });
        let handle = Self {
            slot: Arc::clone(&slot),
            name: name.into(),
            submitted: Instant::now(),
            submit_site: Backtrace::capture(),
        };
        (handle, slot)
    }

    /// Diagnostic name this job was submitted under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker has finished this job.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }

    /// Execution time on the worker, once finished.
    pub fn execution_time(&self) -> Option<Duration> {
        match *self.slot.state.lock() {
            SlotState::Finished { execution, .. } => Some(execution),
            _ => None,
        }
    }

    /// Block until the worker completes this job.
    ///
    /// Returns the result, or the captured failure wrapped in
    /// [`Error::Job`] so the original cause stays on the chain. When the
    /// queued-to-complete or execution time exceeds `warn_threshold_ms`,
    /// a warning naming the job and its submission site is logged; the
    /// result is unaffected.
    pub fn join(self, warn_threshold_ms: Option<u64>) -> Result<T> {
        let (result, execution) = {
            let mut state = self.slot.state.lock();
            loop {
                match std::mem::replace(&mut *state, SlotState::Taken) {
                    SlotState::Finished { result, execution } => break (result, execution),
                    SlotState::Pending => {
                        *state = SlotState::Pending;
                        self.slot.done.wait(&mut state);
                    }
                    SlotState::Taken => {
                        break (
                            Err(Error::Internal(format!(
                                "job '{}' joined twice",
                                self.name
                            ))),
                            Duration::ZERO,
                        )
                    }
                }
            }
        };

        let total = self.submitted.elapsed();
        if let Some(threshold) = warn_threshold_ms {
            let threshold = Duration::from_millis(threshold);
            if total >= threshold || execution >= threshold {
                warn!(
                    job = %self.name,
                    execution_ms = execution.as_millis() as u64,
                    total_ms = total.as_millis() as u64,
                    submitted_from = %self.submit_site,
                    "job exceeded warn threshold"
                );
            }
        }

        match result {
            Ok(value) => Ok(value),
            // Panics are already the dispatcher's own kind; everything
            // else gets wrapped so the cause chain survives.
            Err(e @ Error::JobPanicked { .. }) => Err(e),
            Err(e) => Err(Error::job(self.name, e)),
        }
    }
}

impl<T> JobSlot<T> {
    /// Fill the slot and wake the joiner. Called exactly once.
    pub(crate) fn complete(&self, result: Result<T>, execution: Duration) {
        let mut state = self.state.lock();
        debug_assert!(
            matches!(*state, SlotState::Pending),
            "job completed twice"
        );
        *state = SlotState::Finished { result, execution };
        self.done.notify_all();
    }
}
