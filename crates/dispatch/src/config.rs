//! Pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Whether the pool may run more than one worker.
    ///
    /// When false the pool drains to exactly one thread regardless of the
    /// min/max bounds.
    pub multithreaded: bool,
    /// Number of workers started when a multithreaded pool launches.
    pub min_threads: usize,
    /// Upper bound on workers a multithreaded pool may grow to.
    ///
    /// Growth only ever happens for read work; writes gain nothing from
    /// extra threads since only one writer may proceed at a time.
    pub max_threads: usize,
    /// Total attempts for a statement hitting engine contention.
    pub busy_attempts: u32,
    /// Sleep between contention attempts, in milliseconds.
    pub busy_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            multithreaded: false,
            min_threads: 1,
            max_threads: 4,
            busy_attempts: 3,
            busy_backoff_ms: 50,
        }
    }
}

impl PoolConfig {
    /// Enable or disable multithreaded mode.
    pub fn multithreaded(mut self, on: bool) -> Self {
        self.multithreaded = on;
        self
    }

    /// Set the minimum worker count for multithreaded pools.
    pub fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = n;
        self
    }

    /// Set the maximum worker count for multithreaded pools.
    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// Set the total attempt budget for contended statements.
    pub fn busy_attempts(mut self, n: u32) -> Self {
        self.busy_attempts = n;
        self
    }

    /// Set the sleep between contention attempts.
    pub fn busy_backoff_ms(mut self, ms: u64) -> Self {
        self.busy_backoff_ms = ms;
        self
    }

    /// Clamp the bounds into a usable shape (at least one thread, max
    /// never below min, at least one statement attempt).
    pub fn normalized(mut self) -> Self {
        self.min_threads = self.min_threads.max(1);
        self.max_threads = self.max_threads.max(self.min_threads);
        self.busy_attempts = self.busy_attempts.max(1);
        self
    }

    pub(crate) fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_threaded() {
        let config = PoolConfig::default();
        assert!(!config.multithreaded);
        assert_eq!(config.min_threads, 1);
        assert_eq!(config.busy_attempts, 3);
    }

    #[test]
    fn normalized_repairs_inverted_bounds() {
        let config = PoolConfig::default()
            .min_threads(8)
            .max_threads(2)
            .busy_attempts(0)
            .normalized();
        assert_eq!(config.min_threads, 8);
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.busy_attempts, 1);
    }

    #[test]
    fn builder_round_trip() {
        let config = PoolConfig::default()
            .multithreaded(true)
            .max_threads(16)
            .busy_backoff_ms(10);
        assert!(config.multithreaded);
        assert_eq!(config.max_threads, 16);
        assert_eq!(config.busy_backoff(), Duration::from_millis(10));
    }
}
