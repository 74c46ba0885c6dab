//! Per-cache counters for identity-cache activity.
//!
//! Counters are lock-free `AtomicU64` with `Relaxed` ordering; a snapshot may
//! be slightly stale but is never torn.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters owned by one [`crate::ObjectCache`].
#[derive(Debug)]
pub struct CacheMetrics {
    /// Lookups answered by a live cached proxy.
    pub hits_total: AtomicU64,
    /// Reentrant lookups answered by a proxy registered mid-construction.
    pub reentrant_hits_total: AtomicU64,
    /// Lookups that had to construct a proxy.
    pub misses_total: AtomicU64,
    /// Constructions that published a proxy.
    pub constructions_total: AtomicU64,
    /// Constructions rolled back after an error or panic.
    pub construction_failures_total: AtomicU64,
    /// Lookups that blocked on another thread's construction.
    pub waits_total: AtomicU64,
    /// Blocked lookups abandoned because the caller was cancelled.
    pub interrupted_waits_total: AtomicU64,
    /// Slots removed because their proxy had been dropped.
    pub evictions_total: AtomicU64,
}

impl CacheMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hits_total: AtomicU64::new(0),
            reentrant_hits_total: AtomicU64::new(0),
            misses_total: AtomicU64::new(0),
            constructions_total: AtomicU64::new(0),
            construction_failures_total: AtomicU64::new(0),
            waits_total: AtomicU64::new(0),
            interrupted_waits_total: AtomicU64::new(0),
            evictions_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reentrant_hit(&self) {
        self.reentrant_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_construction(&self) {
        self.constructions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_construction_failure(&self) {
        self.construction_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interrupted_wait(&self) {
        self.interrupted_waits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions_total.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Read a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits_total: self.hits_total.load(Ordering::Relaxed),
            reentrant_hits_total: self.reentrant_hits_total.load(Ordering::Relaxed),
            misses_total: self.misses_total.load(Ordering::Relaxed),
            constructions_total: self.constructions_total.load(Ordering::Relaxed),
            construction_failures_total: self.construction_failures_total.load(Ordering::Relaxed),
            waits_total: self.waits_total.load(Ordering::Relaxed),
            interrupted_waits_total: self.interrupted_waits_total.load(Ordering::Relaxed),
            evictions_total: self.evictions_total.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (tests/diagnostics).
    pub fn reset(&self) {
        self.hits_total.store(0, Ordering::Relaxed);
        self.reentrant_hits_total.store(0, Ordering::Relaxed);
        self.misses_total.store(0, Ordering::Relaxed);
        self.constructions_total.store(0, Ordering::Relaxed);
        self.construction_failures_total.store(0, Ordering::Relaxed);
        self.waits_total.store(0, Ordering::Relaxed);
        self.interrupted_waits_total.store(0, Ordering::Relaxed);
        self.evictions_total.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits_total: u64,
    pub reentrant_hits_total: u64,
    pub misses_total: u64,
    pub constructions_total: u64,
    pub construction_failures_total: u64,
    pub waits_total: u64,
    pub interrupted_waits_total: u64,
    pub evictions_total: u64,
}

impl std::fmt::Display for CacheMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache(hits={} reentrant={} misses={} built={} failed={} waits={} interrupted={} evicted={})",
            self.hits_total,
            self.reentrant_hits_total,
            self.misses_total,
            self.constructions_total,
            self.construction_failures_total,
            self.waits_total,
            self.interrupted_waits_total,
            self.evictions_total,
        )
    }
}
