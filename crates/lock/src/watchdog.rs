//! Long-held-lock watchdog
//!
//! One detached background thread per arbiter (when a warn threshold is
//! configured). Each pass asks the arbiter to warn about commands that
//! have held the lock past the threshold, so production lock-contention
//! bugs surface in the logs with the holder's command text and backtrace.
//!
//! The thread holds only a `Weak` reference and exits on its own once the
//! arbiter is dropped.

use std::sync::Weak;
use std::thread;
use std::time::Duration;
use tracing::error;

use crate::arbiter::LockArbiter;

pub(crate) fn spawn(arbiter: Weak<LockArbiter>, name: &str, interval: Duration) {
    let result = thread::Builder::new()
        .name(format!("lock-watchdog-{name}"))
        .spawn(move || loop {
            thread::sleep(interval);
            match arbiter.upgrade() {
                Some(arbiter) => {
                    arbiter.scan_long_held();
                }
                None => break,
            }
        });

    if let Err(e) = result {
        // Diagnostics only; the lock itself works without the watchdog.
        error!(db = %name, error = %e, "failed to spawn lock watchdog");
    }
}
