//! Arbiter registry
//!
//! Maps logical database names to their shared [`LockArbiter`]. This is
//! the explicit replacement for per-connection-type global lock state:
//! "one arbiter per logical database" is preserved, but the owner of the
//! registry decides its scope instead of a hidden static.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::arbiter::{LockArbiter, LockConfig};

/// Name → arbiter map, shared by every connection wrapper of a database.
pub struct LockRegistry {
    arbiters: DashMap<String, Arc<LockArbiter>>,
    config: LockConfig,
}

impl LockRegistry {
    /// Create a registry; every arbiter it creates uses `config`.
    pub fn new(config: LockConfig) -> Self {
        Self {
            arbiters: DashMap::new(),
            config,
        }
    }

    /// Get the arbiter for a logical database, creating it on first use.
    pub fn arbiter_for(&self, name: &str) -> Arc<LockArbiter> {
        self.arbiters
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(db = %name, "creating lock arbiter");
                LockArbiter::new(name, self.config.clone())
            })
            .clone()
    }

    /// Drop the arbiter for a database whose connections were all torn
    /// down (e.g. after a schema reorg forces a full reopen).
    ///
    /// Logs a leak warning when holds are still outstanding; the arbiter
    /// stays alive for those holders through their own `Arc`s regardless.
    pub fn purge(&self, name: &str) {
        if let Some((_, arbiter)) = self.arbiters.remove(name) {
            let outstanding = arbiter.outstanding_holds();
            if outstanding > 0 {
                warn!(db = %name, outstanding, "purging arbiter with outstanding lock holds");
            }
        }
    }

    /// Number of registered arbiters.
    pub fn len(&self) -> usize {
        self.arbiters.len()
    }

    /// True when no arbiters are registered.
    pub fn is_empty(&self) -> bool {
        self.arbiters.is_empty()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_arbiter() {
        let registry = LockRegistry::default();
        let a = registry.arbiter_for("app.db");
        let b = registry.arbiter_for("app.db");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_names_different_arbiters() {
        let registry = LockRegistry::default();
        let a = registry.arbiter_for("app.db");
        let b = registry.arbiter_for("cache.db");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn purge_allows_fresh_arbiter() {
        let registry = LockRegistry::default();
        let before = registry.arbiter_for("app.db");
        registry.purge("app.db");
        let after = registry.arbiter_for("app.db");
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
