//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering. They are observational only; the
//! pool mutex provides the ordering guarantees for correctness.
//!
//! Besides the per-allocator [`Stats`], two process-wide gauges track how
//! many providers and pools are alive. Providers and pools move them on
//! creation and on drop, so a failed `init` that leaks nothing leaves them
//! where they were.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters kept by each [`crate::Allocator`].
#[derive(Debug)]
pub struct Stats {
    /// Successful calls to alloc.
    alloc_count: AtomicU64,
    /// Calls to alloc that returned null (zero size, exhaustion, uninitialized).
    alloc_failures: AtomicU64,
    /// Calls to dealloc that returned a block to a pool.
    dealloc_count: AtomicU64,
    /// Pointers rejected by a pool's misuse checks.
    misuse_count: AtomicU64,
    /// Successful inits.
    init_count: AtomicU64,
    /// Finalize calls that tore down a live pool.
    finalize_count: AtomicU64,
}

/// Point-in-time copy of [`Stats`]. Individual loads are atomic but not
/// globally consistent with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub alloc_failures: u64,
    pub dealloc_count: u64,
    pub misuse_count: u64,
    pub init_count: u64,
    pub finalize_count: u64,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            alloc_failures: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            misuse_count: AtomicU64::new(0),
            init_count: AtomicU64::new(0),
            finalize_count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_alloc(&self, ok: bool) {
        if ok {
            self.alloc_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.alloc_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_dealloc(&self) {
        self.dealloc_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_misuse(&self) {
        self.misuse_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_init(&self) {
        self.init_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finalize(&self) {
        self.finalize_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            dealloc_count: self.dealloc_count.load(Ordering::Relaxed),
            misuse_count: self.misuse_count.load(Ordering::Relaxed),
            init_count: self.init_count.load(Ordering::Relaxed),
            finalize_count: self.finalize_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

static LIVE_PROVIDERS: AtomicUsize = AtomicUsize::new(0);
static LIVE_POOLS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide count of live resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resources {
    /// Mapped providers.
    pub providers: usize,
    /// Pools whose strategy is still alive.
    pub pools: usize,
}

/// Returns the current number of live providers and pools in the process.
pub fn resources() -> Resources {
    Resources {
        providers: LIVE_PROVIDERS.load(Ordering::Relaxed),
        pools: LIVE_POOLS.load(Ordering::Relaxed),
    }
}

pub(crate) fn provider_mapped() {
    LIVE_PROVIDERS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn provider_unmapped() {
    LIVE_PROVIDERS.fetch_sub(1, Ordering::Relaxed);
}

pub(crate) fn pool_created() {
    LIVE_POOLS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn pool_destroyed() {
    LIVE_POOLS.fetch_sub(1, Ordering::Relaxed);
}
