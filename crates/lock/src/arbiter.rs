//! The shared lock state machine
//!
//! One [`LockArbiter`] exists per logical database and is the sole judge
//! of which thread may talk to that engine at any instant. The state
//! machine has three modes:
//!
//! ```text
//! Free ──acquire_upgradeable──> UpgradeableHeld ──escalate──> WriteHeld
//!   ^                                                             │
//!   └──────────────────────release_write──────────────────────────┘
//! ```
//!
//! Shared readers are counted separately and may coexist with
//! `UpgradeableHeld` (a writer-intent that has not yet escalated). The
//! invariants:
//! - at most one thread holds the upgradeable slot
//! - `WriteHeld` implies zero active readers
//! - readers and a writer are never active together
//!
//! Writer intent goes through the upgradeable slot first. Acquiring the
//! exclusive lock directly would let two writer-intents deadlock each
//! other waiting for readers to drain; the single upgradeable slot
//! serializes them before escalation starts.
//!
//! All waits are bounded per attempt and retried indefinitely, with a
//! tracing diagnostic naming the current writer and its hold duration
//! when the first attempt times out.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::watchdog;

/// Configuration for a [`LockArbiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Per-attempt wait before re-checking and tracing, in milliseconds.
    pub acquire_retry_ms: u64,
    /// Warn threshold for long-held commands, in milliseconds.
    ///
    /// `None` disables the watchdog entirely.
    pub warn_after_ms: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_retry_ms: 1_000,
            warn_after_ms: Some(10_000),
        }
    }
}

impl LockConfig {
    /// Set the per-attempt acquire timeout.
    pub fn acquire_retry_ms(mut self, ms: u64) -> Self {
        self.acquire_retry_ms = ms;
        self
    }

    /// Set (or disable) the long-held-command warn threshold.
    pub fn warn_after_ms(mut self, ms: Option<u64>) -> Self {
        self.warn_after_ms = ms;
        self
    }

    fn retry(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_ms)
    }
}

/// A statement currently executing under the lock, tracked for the
/// watchdog.
#[derive(Debug)]
struct CommandInfo {
    text: String,
    since: Instant,
    backtrace: Option<String>,
    warned: bool,
}

#[derive(Debug)]
struct ArbiterState {
    /// Thread holding the upgradeable slot, escalated or not.
    upgrade_holder: Option<ThreadId>,
    /// True once the upgradeable holder owns the exclusive lock.
    write_held: bool,
    /// True while the upgradeable holder waits for readers to drain.
    /// New readers are turned away from this point on.
    escalating: bool,
    /// When the exclusive lock was taken (diagnostics).
    writer_since: Option<Instant>,
    /// Active shared holders.
    readers: usize,
    /// Threads currently blocked in `acquire_shared`.
    readers_waiting: usize,
    /// In-flight commands by executing thread.
    commands: HashMap<ThreadId, CommandInfo>,
}

/// The reader/writer arbiter for one logical database.
///
/// Shared (via `Arc`) by every lock session for connections to the same
/// database. Sessions, not the arbiter, track re-entrancy and thread
/// affinity; the arbiter only counts real acquisitions.
#[derive(Debug)]
pub struct LockArbiter {
    name: String,
    config: LockConfig,
    state: Mutex<ArbiterState>,
    /// Readers wait here while the lock is write-held or escalating.
    readers_cv: Condvar,
    /// Upgradeable-slot waiters and the escalating holder wait here.
    writers_cv: Condvar,
    /// Open holds across all sessions, for the shutdown leak check.
    outstanding: AtomicUsize,
}

impl LockArbiter {
    /// Create an arbiter for the named logical database.
    ///
    /// Spawns the long-held-lock watchdog when a warn threshold is
    /// configured; the watchdog holds only a weak reference and exits
    /// once the arbiter is dropped.
    pub fn new(name: impl Into<String>, config: LockConfig) -> Arc<Self> {
        let arbiter = Arc::new(Self {
            name: name.into(),
            config: config.clone(),
            state: Mutex::new(ArbiterState {
                upgrade_holder: None,
                write_held: false,
                escalating: false,
                writer_since: None,
                readers: 0,
                readers_waiting: 0,
                commands: HashMap::new(),
            }),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            outstanding: AtomicUsize::new(0),
        });

        if let Some(warn_ms) = config.warn_after_ms {
            watchdog::spawn(
                Arc::downgrade(&arbiter),
                &arbiter.name,
                Duration::from_millis((warn_ms / 2).max(100)),
            );
        }

        arbiter
    }

    /// Logical database name this arbiter governs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of holds not yet released across all sessions.
    ///
    /// Non-zero at shutdown means a guard leaked somewhere.
    pub fn outstanding_holds(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of threads currently blocked waiting for read access.
    pub fn readers_waiting(&self) -> usize {
        self.state.lock().readers_waiting
    }

    /// Acquire shared read access, waiting out any active writer.
    pub(crate) fn acquire_shared(&self) {
        let mut state = self.state.lock();
        state.readers_waiting += 1;
        let mut attempt = 0u32;
        loop {
            if !state.write_held && !state.escalating {
                state.readers_waiting -= 1;
                state.readers += 1;
                self.outstanding.fetch_add(1, Ordering::AcqRel);
                return;
            }
            attempt += 1;
            let timed_out = self
                .readers_cv
                .wait_for(&mut state, self.config.retry())
                .timed_out();
            if timed_out {
                let held_ms = state
                    .writer_since
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                if attempt == 1 {
                    warn!(
                        db = %self.name,
                        writer = ?state.upgrade_holder,
                        held_ms,
                        "reader blocked waiting for write lock"
                    );
                } else {
                    debug!(db = %self.name, attempt, held_ms, "reader still waiting");
                }
            }
        }
    }

    /// Release shared read access.
    pub(crate) fn release_shared(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0, "release_shared without acquire");
        state.readers -= 1;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if state.readers == 0 {
            // Wake an escalating writer-intent waiting for readers to drain.
            self.writers_cv.notify_all();
        }
    }

    /// Acquire the upgradeable slot. At most one thread holds it.
    pub(crate) fn acquire_upgradeable(&self) {
        let caller = thread::current().id();
        let mut state = self.state.lock();
        let mut attempt = 0u32;
        loop {
            if state.upgrade_holder.is_none() {
                state.upgrade_holder = Some(caller);
                self.outstanding.fetch_add(1, Ordering::AcqRel);
                return;
            }
            attempt += 1;
            let timed_out = self
                .writers_cv
                .wait_for(&mut state, self.config.retry())
                .timed_out();
            if timed_out && attempt == 1 {
                warn!(
                    db = %self.name,
                    holder = ?state.upgrade_holder,
                    escalated = state.write_held,
                    "writer-intent blocked waiting for upgradeable slot"
                );
            }
        }
    }

    /// Escalate the held upgradeable slot to the exclusive write lock.
    ///
    /// From this point new readers are turned away; the wait ends when
    /// the active reader count drains to zero.
    pub(crate) fn escalate(&self) {
        let caller = thread::current().id();
        let mut state = self.state.lock();
        debug_assert_eq!(
            state.upgrade_holder,
            Some(caller),
            "escalate without holding the upgradeable slot"
        );
        state.escalating = true;
        let mut attempt = 0u32;
        while state.readers > 0 {
            attempt += 1;
            let timed_out = self
                .writers_cv
                .wait_for(&mut state, self.config.retry())
                .timed_out();
            if timed_out && attempt == 1 {
                warn!(
                    db = %self.name,
                    readers = state.readers,
                    waiting = state.readers_waiting,
                    "writer blocked waiting for readers to drain"
                );
            }
        }
        state.escalating = false;
        state.write_held = true;
        state.writer_since = Some(Instant::now());
    }

    /// Release the exclusive write lock and the upgradeable slot with it.
    pub(crate) fn release_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.write_held, "release_write without escalate");
        state.write_held = false;
        state.escalating = false;
        state.upgrade_holder = None;
        state.writer_since = None;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        // Readers and queued writer-intents both become eligible.
        self.readers_cv.notify_all();
        self.writers_cv.notify_all();
    }

    /// Record the statement the calling thread is about to execute.
    pub(crate) fn begin_command(&self, text: &str) {
        let backtrace = self
            .config
            .warn_after_ms
            .map(|_| Backtrace::force_capture().to_string());
        let mut state = self.state.lock();
        state.commands.insert(
            thread::current().id(),
            CommandInfo {
                text: text.to_string(),
                since: Instant::now(),
                backtrace,
                warned: false,
            },
        );
    }

    /// Clear the calling thread's in-flight command record.
    pub(crate) fn end_command(&self) {
        let mut state = self.state.lock();
        state.commands.remove(&thread::current().id());
    }

    /// Watchdog pass: warn once for each command held past the threshold.
    ///
    /// Returns how many commands were newly flagged in this pass.
    pub(crate) fn scan_long_held(&self) -> usize {
        let Some(warn_ms) = self.config.warn_after_ms else {
            return 0;
        };
        let threshold = Duration::from_millis(warn_ms);

        let mut overdue = Vec::new();
        {
            let mut state = self.state.lock();
            for (thread_id, info) in state.commands.iter_mut() {
                if !info.warned && info.since.elapsed() >= threshold {
                    info.warned = true;
                    overdue.push((
                        *thread_id,
                        info.text.clone(),
                        info.since.elapsed(),
                        info.backtrace.clone(),
                    ));
                }
            }
        }

        let flagged = overdue.len();
        for (thread_id, text, elapsed, backtrace) in overdue {
            warn!(
                db = %self.name,
                holder = ?thread_id,
                elapsed_ms = elapsed.as_millis() as u64,
                command = %text,
                backtrace = %backtrace.unwrap_or_else(|| "<not captured>".to_string()),
                "command has held the lock past the warn threshold"
            );
        }
        flagged
    }
}
