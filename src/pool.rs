use std::ptr::NonNull;

use log::debug;
use parking_lot::Mutex;

use crate::{
    config::PoolConfig,
    error::{Error, Result},
    provider::MemoryProvider,
    stats,
    strategy::{self, Strategy},
};

/// An allocator pool over the whole range of one [`MemoryProvider`].
///
/// The pool owns its provider. Calls into the strategy are serialized by a
/// mutex, so a pool can be shared between threads even though strategies
/// themselves are not thread-safe.
pub struct Pool {
    // Declared before `provider`: the strategy is released before the range
    // it describes is unmapped.
    strategy: Mutex<Box<dyn Strategy>>,
    provider: MemoryProvider,
}

impl Pool {
    /// Builds the strategy selected by `config` over the provider's range.
    ///
    /// On failure the provider is dropped, which unmaps it.
    pub fn create(provider: MemoryProvider, config: &PoolConfig) -> Result<Self> {
        let Some(base) = provider.base() else {
            return Err(Error::InvalidArgument("provider is not mapped".into()));
        };

        let strategy = unsafe { strategy::build(config, base, provider.size()) }?;

        stats::pool_created();
        debug!(
            "{} pool over {} ({} bytes, largest allocation {})",
            strategy.name(),
            provider.path().display(),
            provider.size(),
            strategy.capacity()
        );

        Ok(Self {
            strategy: Mutex::new(strategy),
            provider,
        })
    }

    /// Returns at least `size` bytes inside the mapped range, or `None` when
    /// `size` is zero or the pool is exhausted.
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        self.strategy.lock().malloc(size)
    }

    /// Same as [`Pool::malloc`] but returns `None` instead of waiting when
    /// another caller is inside the strategy.
    pub fn try_malloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        self.strategy.try_lock()?.malloc(size)
    }

    /// Returns `ptr` to the pool. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` should have been returned by [`Pool::malloc`] on this pool and
    /// not freed since. Violations are reported as
    /// [`Error::CallerMisuse`] where the strategy can detect them.
    pub unsafe fn free(&self, ptr: *mut u8) -> Result<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };

        unsafe { self.strategy.lock().free(ptr) }.map(|_| ())
    }

    /// Zeroes every byte a caller could later receive. Has no effect while
    /// allocations are live.
    pub fn zero_fill(&self) {
        debug!("zero-filling {}", self.provider.path().display());

        self.strategy.lock().scrub();
    }

    /// Largest single allocation an empty pool can satisfy.
    pub fn capacity(&self) -> usize {
        self.strategy.lock().capacity()
    }

    pub fn bytes_in_use(&self) -> usize {
        self.strategy.lock().bytes_in_use()
    }

    /// Name of the strategy, as accepted by [`crate::PoolKind`].
    pub fn kind(&self) -> &'static str {
        self.strategy.lock().name()
    }

    /// Walks the strategy metadata.
    pub fn check(&self) -> Result<()> {
        self.strategy.lock().check()
    }

    /// Size of the mapped range.
    pub fn size(&self) -> usize {
        self.provider.size()
    }

    /// Start of the mapped range.
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.provider.base()
    }

    pub fn provider(&self) -> &MemoryProvider {
        &self.provider
    }

    /// Whether `ptr` lies inside the mapped range.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.base().is_some_and(|base| {
            let start = base.as_ptr() as usize;
            let addr = ptr as usize;
            addr >= start && addr - start < self.provider.size()
        })
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        stats::pool_destroyed();
        debug!("destroyed pool over {}", self.provider.path().display());
    }
}
