//! Process-wide crawl mutual exclusion, keyed by channel name.
//!
//! Explicit commands and the scheduler can race for the same channel; each
//! contender calls `try_acquire` and skips cleanly when it loses. The guard
//! releases on drop, and release is idempotent.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Registry of channels with an active crawl or download run.
#[derive(Clone, Default)]
pub struct CrawlStateRegistry {
    active: Arc<DashMap<String, ()>>,
}

impl CrawlStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the channel; returns `None` when another run already holds it.
    pub fn try_acquire(&self, name: &str) -> Option<CrawlGuard> {
        match self.active.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(());
                Some(CrawlGuard {
                    name: name.to_string(),
                    active: Some(self.active.clone()),
                })
            }
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }
}

/// RAII claim on a channel; dropping (or calling [`CrawlGuard::release`])
/// frees it.
pub struct CrawlGuard {
    name: String,
    active: Option<Arc<DashMap<String, ()>>>,
}

impl CrawlGuard {
    /// Explicit release; subsequent calls and the drop are no-ops.
    pub fn release(&mut self) {
        if let Some(active) = self.active.take() {
            active.remove(&self.name);
        }
    }
}

impl Drop for CrawlGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let registry = CrawlStateRegistry::new();

        let guard = registry.try_acquire("demo").unwrap();
        assert!(registry.is_active("demo"));
        assert!(registry.try_acquire("demo").is_none());

        // A different channel is unaffected.
        assert!(registry.try_acquire("other").is_some());

        drop(guard);
        assert!(!registry.is_active("demo"));
        assert!(registry.try_acquire("demo").is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let registry = CrawlStateRegistry::new();
        let mut guard = registry.try_acquire("demo").unwrap();

        guard.release();
        assert!(!registry.is_active("demo"));

        // Re-acquire while the old guard still exists, then drop it.
        let _second = registry.try_acquire("demo").unwrap();
        guard.release();
        drop(guard);
        assert!(registry.is_active("demo"));
    }
}
