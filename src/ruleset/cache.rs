//! Process-wide ruleset cache.
//!
//! Holds one resolved snapshot of the configured ruleset batch. Readers
//! load the current snapshot without locking; a refresh resolves a new
//! batch and swaps it in atomically. A mutex serializes refreshes so that
//! concurrent cache misses fetch at most once.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{refresh, RulesetContent, RulesetReference};
use crate::fetch::Fetcher;

/// How a request wants its rulesets resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvePolicy {
    /// Always fetch fresh, never touch the cache
    pub update_on_request: bool,
    /// Fetch references concurrently
    pub concurrent: bool,
}

/// Cache of the configured ruleset batch.
pub struct RulesetCache {
    /// Current snapshot, `None` until first stored.
    snapshot: ArcSwapOption<Vec<RulesetContent>>,
    /// Serializes refreshes.
    refresh_lock: Mutex<()>,
    /// Bumped on every store and invalidation.
    generation: AtomicU64,
}

impl Default for RulesetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesetCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot, if any.
    pub fn get(&self) -> Option<Arc<Vec<RulesetContent>>> {
        self.snapshot.load_full()
    }

    /// Check whether a snapshot is stored.
    pub fn is_loaded(&self) -> bool {
        self.snapshot.load().is_some()
    }

    /// Generation counter, bumped on every store and invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace the snapshot.
    pub fn store(&self, contents: Vec<RulesetContent>) -> Arc<Vec<RulesetContent>> {
        let contents = Arc::new(contents);
        self.snapshot.store(Some(Arc::clone(&contents)));
        self.generation.fetch_add(1, Ordering::SeqCst);
        contents
    }

    /// Drop the snapshot; the next cached read resolves again.
    pub fn invalidate(&self) {
        self.snapshot.store(None);
        self.generation.fetch_add(1, Ordering::SeqCst);
        log::info!("Ruleset cache invalidated");
    }

    /// Resolve `refs` and store the result unconditionally.
    pub fn refresh(
        &self,
        refs: &[RulesetReference],
        fetcher: &dyn Fetcher,
        concurrent: bool,
    ) -> Arc<Vec<RulesetContent>> {
        let _guard = self.refresh_lock.lock();
        let contents = refresh::resolve(refs, fetcher, concurrent);
        log::info!("Refreshed ruleset cache with {} rulesets", contents.len());
        self.store(contents)
    }

    /// Return the snapshot, resolving and storing it on a miss.
    ///
    /// Concurrent misses wait for the first resolution instead of fetching
    /// again. A batch resolved across an invalidation is returned but not
    /// stored.
    pub fn get_or_resolve(
        &self,
        refs: &[RulesetReference],
        fetcher: &dyn Fetcher,
        concurrent: bool,
    ) -> Arc<Vec<RulesetContent>> {
        if let Some(cached) = self.get() {
            log::debug!("Ruleset cache hit");
            return cached;
        }

        let _guard = self.refresh_lock.lock();
        if let Some(cached) = self.get() {
            return cached;
        }

        let generation = self.generation();
        let contents = refresh::resolve(refs, fetcher, concurrent);
        if self.generation() != generation {
            return Arc::new(contents);
        }
        self.store(contents)
    }

    /// Resolve rulesets for one request.
    ///
    /// - `update_on_request`: always resolve fresh, never stored.
    /// - non-empty `overrides`: resolve the overrides fresh, never stored.
    /// - otherwise: the cached batch of `refs`.
    pub fn resolve_for_request(
        &self,
        refs: &[RulesetReference],
        overrides: &[RulesetReference],
        fetcher: &dyn Fetcher,
        policy: ResolvePolicy,
    ) -> Arc<Vec<RulesetContent>> {
        let source = if overrides.is_empty() { refs } else { overrides };
        if policy.update_on_request || !overrides.is_empty() {
            return Arc::new(refresh::resolve(source, fetcher, policy.concurrent));
        }
        self.get_or_resolve(refs, fetcher, policy.concurrent)
    }
}
