//! The allocator facade: one pool at a time, built by `init` and torn down
//! by `finalize`.
//!
//! ```text
//!              init (ok)
//!   Uninitialized ------> Ready
//!         ^                 |
//!         +---- finalize ---+
//! ```
//!
//! A failing `init` leaves the allocator `Uninitialized`. Whatever was built
//! before the failing stage is dropped on the way out, so nothing leaks.

use std::{path::Path, ptr::NonNull};

use log::{error, info, warn};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::{
    config::PoolConfig,
    error::{InitError, Result},
    pool::Pool,
    provider::{MemoryProvider, ProviderParams},
    stats::{Snapshot, Stats},
};

/// Observable state of an [`Allocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Ready,
}

/// Allocator over a device-backed pool.
///
/// `alloc` and `dealloc` share a read lock, `finalize` and a successful
/// `init` take the write lock. `finalize` therefore waits for calls already
/// in flight instead of pulling the pool out from under them. An `init`
/// rejected because a pool is live never excludes readers.
pub struct Allocator {
    config: PoolConfig,
    pool: RwLock<Option<Pool>>,
    stats: Stats,
}

impl Allocator {
    /// Creates an uninitialized allocator whose pools are built with `config`.
    pub const fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pool: parking_lot::const_rwlock(None),
            stats: Stats::new(),
        }
    }

    /// Maps `size` bytes of `path` and builds a pool over them with the
    /// configuration given at construction.
    pub fn init(&self, path: impl AsRef<Path>, size: usize) -> Result<(), InitError> {
        self.init_with(path, size, &self.config)
    }

    /// Same as [`Allocator::init`] with an explicit pool configuration.
    ///
    /// Calling this on a `Ready` allocator fails with
    /// [`InitError::AlreadyInitialized`] and leaves the current pool alone.
    pub fn init_with(
        &self,
        path: impl AsRef<Path>,
        size: usize,
        config: &PoolConfig,
    ) -> Result<(), InitError> {
        let path = path.as_ref();

        let result = {
            // Deciding under an upgradable lock lets a rejected init run
            // alongside readers; only a real build takes the write lock.
            let slot = self.pool.upgradable_read();

            if slot.is_some() {
                Err(InitError::AlreadyInitialized)
            } else {
                let mut slot = RwLockUpgradableReadGuard::upgrade(slot);

                build(path, size, config).map(|pool| {
                    if config.zero_fill {
                        pool.zero_fill();
                    }

                    let kind = pool.kind();
                    *slot = Some(pool);
                    kind
                })
            }
        };

        match result {
            Ok(kind) => {
                self.stats.record_init();
                info!("{kind} allocator ready over {} ({size} bytes)", path.display());
                Ok(())
            }
            Err(InitError::AlreadyInitialized) => {
                warn!("init of {} rejected: allocator is already initialized", path.display());
                Err(InitError::AlreadyInitialized)
            }
            Err(err) => {
                match err.cause() {
                    Some(cause) => error!("init of {} failed: {err}: {cause}", path.display()),
                    None => error!("init of {} failed: {err}", path.display()),
                }
                Err(err)
            }
        }
    }

    /// Returns at least `size` bytes from the pool.
    ///
    /// `None` when the allocator is uninitialized, `size` is zero, or the
    /// pool cannot satisfy the request.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.pool.read().as_ref().and_then(|pool| pool.malloc(size));

        self.stats.record_alloc(ptr.is_some());
        ptr
    }

    /// Like [`Allocator::alloc`] but gives up instead of waiting for
    /// `init`, `finalize` or another caller inside the pool.
    pub(crate) fn try_alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let pool = self.pool.try_read()?;
        let ptr = pool.as_ref().and_then(|pool| pool.try_malloc(size));

        self.stats.record_alloc(ptr.is_some());
        ptr
    }

    /// Returns `ptr` to the pool.
    ///
    /// Null, and any pointer while uninitialized, is ignored. Pointers the
    /// pool rejects are logged and counted in [`Snapshot::misuse_count`].
    ///
    /// # Safety
    ///
    /// `ptr` should come from [`Allocator::alloc`] on this allocator since
    /// the last `init`, and must not be used afterwards.
    pub unsafe fn dealloc(&self, ptr: *mut u8) {
        if let Err(err) = unsafe { self.try_dealloc(ptr) } {
            warn!("dealloc ignored: {err}");
        }
    }

    /// Same as [`Allocator::dealloc`] but reports rejected pointers.
    ///
    /// # Safety
    ///
    /// See [`Allocator::dealloc`].
    pub unsafe fn try_dealloc(&self, ptr: *mut u8) -> Result<()> {
        unsafe { self.release(self.pool.read().as_ref(), ptr) }
    }

    /// Same as [`Allocator::try_dealloc`] but returns `None` instead of
    /// waiting while a pool is being built or torn down. In both cases `ptr`
    /// cannot belong to a live pool.
    pub(crate) unsafe fn try_dealloc_nonblocking(&self, ptr: *mut u8) -> Option<Result<()>> {
        let pool = self.pool.try_read_recursive()?;

        Some(unsafe { self.release(pool.as_ref(), ptr) })
    }

    unsafe fn release(&self, pool: Option<&Pool>, ptr: *mut u8) -> Result<()> {
        let Some(pool) = pool else {
            return Ok(());
        };

        if ptr.is_null() {
            return Ok(());
        }

        match unsafe { pool.free(ptr) } {
            Ok(()) => {
                self.stats.record_dealloc();
                Ok(())
            }
            Err(err) => {
                self.stats.record_misuse();
                Err(err)
            }
        }
    }

    /// Tears down the pool and unmaps the region. Idempotent.
    ///
    /// Every pointer handed out since `init` is invalid afterwards.
    pub fn finalize(&self) {
        let Some(pool) = self.pool.write().take() else {
            return;
        };

        let path = pool.provider().path().to_path_buf();
        drop(pool);

        self.stats.record_finalize();
        info!("allocator over {} finalized", path.display());
    }

    pub fn state(&self) -> State {
        if self.pool.read().is_some() {
            State::Ready
        } else {
            State::Uninitialized
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == State::Ready
    }

    /// Largest single allocation the empty pool can satisfy, 0 when
    /// uninitialized.
    pub fn capacity(&self) -> usize {
        self.pool.read().as_ref().map_or(0, Pool::capacity)
    }

    /// Size of the mapped region, 0 when uninitialized.
    pub fn size(&self) -> usize {
        self.pool.read().as_ref().map_or(0, Pool::size)
    }

    pub fn bytes_in_use(&self) -> usize {
        self.pool.read().as_ref().map_or(0, Pool::bytes_in_use)
    }

    /// Walks the pool metadata. Trivially consistent when uninitialized.
    pub fn check(&self) -> Result<()> {
        self.pool.read().as_ref().map_or(Ok(()), Pool::check)
    }

    /// Whether `ptr` points into the current pool's region.
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.pool.read().as_ref().is_some_and(|pool| pool.contains(ptr))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> Snapshot {
        self.stats.snapshot()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(PoolConfig::new())
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Runs the init stages in order. Each stage owns what the previous ones
/// produced, so an early return drops it.
fn build(path: &Path, size: usize, config: &PoolConfig) -> Result<Pool, InitError> {
    let params = ProviderParams::new(path, size).map_err(InitError::ProviderParams)?;
    let provider = MemoryProvider::create(&params).map_err(InitError::ProviderCreate)?;

    config.validate().map_err(InitError::PoolParams)?;

    Pool::create(provider, config).map_err(InitError::PoolCreate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Misuse};
    use tempfile::NamedTempFile;

    const SIZE: usize = 1 << 20;

    fn backing(len: usize) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(len as u64).unwrap();
        file
    }

    #[test]
    fn uninitialized_allocator_is_inert() {
        let allocator = Allocator::default();

        assert_eq!(allocator.state(), State::Uninitialized);
        assert!(allocator.alloc(64).is_none());
        assert_eq!(allocator.capacity(), 0);

        unsafe {
            allocator.dealloc(std::ptr::null_mut());
            allocator.dealloc(0x1000 as *mut u8);
        }

        allocator.finalize();
        assert_eq!(allocator.stats().alloc_failures, 1);
        assert_eq!(allocator.stats().dealloc_count, 0);
    }

    #[test]
    fn init_alloc_dealloc_finalize() {
        let file = backing(SIZE);
        let allocator = Allocator::default();

        allocator.init(file.path(), SIZE).unwrap();
        assert!(allocator.is_initialized());
        assert_eq!(allocator.size(), SIZE);

        let ptr = allocator.alloc(100).unwrap();
        assert!(allocator.owns(ptr.as_ptr()));
        assert_eq!(ptr.as_ptr() as usize % 16, 0);

        unsafe {
            ptr.as_ptr().write_bytes(0x5a, 100);
            allocator.dealloc(ptr.as_ptr());
        }

        assert_eq!(allocator.bytes_in_use(), 0);
        allocator.check().unwrap();

        allocator.finalize();
        assert_eq!(allocator.state(), State::Uninitialized);
        assert!(allocator.alloc(100).is_none());

        let stats = allocator.stats();
        assert_eq!(stats.init_count, 1);
        assert_eq!(stats.alloc_count, 1);
        assert_eq!(stats.dealloc_count, 1);
        assert_eq!(stats.finalize_count, 1);
    }

    #[test]
    fn second_init_is_rejected_and_pool_survives() {
        let file = backing(SIZE);
        let other = backing(SIZE);
        let allocator = Allocator::default();

        allocator.init(file.path(), SIZE).unwrap();
        let ptr = allocator.alloc(32).unwrap();

        let err = allocator.init(other.path(), SIZE).unwrap_err();
        assert!(matches!(err, InitError::AlreadyInitialized));
        assert_eq!(err.code(), 5);

        assert!(allocator.owns(ptr.as_ptr()));
        unsafe { allocator.try_dealloc(ptr.as_ptr()) }.unwrap();
    }

    #[test]
    fn init_stages_report_their_code() {
        let file = backing(4096);
        let allocator = Allocator::default();

        let err = allocator.init("", SIZE).unwrap_err();
        assert_eq!(err.code(), 1);

        let err = allocator.init(file.path(), 0).unwrap_err();
        assert_eq!(err.code(), 1);

        // Longer than the backing file.
        let err = allocator.init(file.path(), SIZE).unwrap_err();
        assert_eq!(err.code(), 2);

        let err = allocator
            .init_with(file.path(), 4096, &PoolConfig::fixed_size(0))
            .unwrap_err();
        assert_eq!(err.code(), 3);

        let err = allocator
            .init_with(file.path(), 4096, &PoolConfig::fixed_size(8192))
            .unwrap_err();
        assert_eq!(err.code(), 4);
        assert!(matches!(err.cause(), Some(Error::StrategyInitFailed { .. })));

        assert_eq!(allocator.state(), State::Uninitialized);
        assert_eq!(allocator.stats().init_count, 0);
    }

    #[test]
    fn rejected_init_leaves_nonblocking_release_working() {
        let file = backing(SIZE);
        let allocator = Allocator::default();
        allocator.init(file.path(), SIZE).unwrap();

        let ptr = allocator.alloc(256).unwrap();

        // The lock a rejected init holds while it looks at the pool.
        let deciding = allocator.pool.upgradable_read();
        let freed = unsafe { allocator.try_dealloc_nonblocking(ptr.as_ptr()) };
        drop(deciding);

        assert!(matches!(freed, Some(Ok(()))));
        assert_eq!(allocator.bytes_in_use(), 0);
    }

    #[test]
    fn rejected_init_runs_alongside_readers() {
        let file = backing(SIZE);
        let allocator = Allocator::default();
        allocator.init(file.path(), SIZE).unwrap();

        let reader = allocator.pool.read();
        let err = allocator.init(file.path(), SIZE).unwrap_err();
        drop(reader);

        assert!(matches!(err, InitError::AlreadyInitialized));
    }

    #[test]
    fn reinit_after_finalize() {
        let file = backing(SIZE);
        let allocator = Allocator::new(PoolConfig::fixed_size(128));

        for _ in 0..3 {
            allocator.init(file.path(), SIZE).unwrap();
            assert_eq!(allocator.capacity(), 128);
            assert!(allocator.alloc(128).is_some());
            allocator.finalize();
        }

        allocator.finalize();
        assert_eq!(allocator.stats().finalize_count, 3);
    }

    #[test]
    fn zero_fill_clears_residual_bytes() {
        let file = backing(SIZE);
        std::fs::write(file.path(), vec![0xffu8; SIZE]).unwrap();

        let allocator = Allocator::default();
        allocator.init(file.path(), SIZE).unwrap();

        let ptr = allocator.alloc(4096).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 4096) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_fill_can_be_disabled() {
        let file = backing(SIZE);
        std::fs::write(file.path(), vec![0xffu8; SIZE]).unwrap();

        let allocator = Allocator::new(PoolConfig::fixed_size(64).with_zero_fill(false));
        allocator.init(file.path(), SIZE).unwrap();

        let ptr = allocator.alloc(64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0xff));
    }

    #[test]
    fn misuse_is_counted_not_propagated() {
        let file = backing(SIZE);
        let allocator = Allocator::default();
        allocator.init(file.path(), SIZE).unwrap();

        let ptr = allocator.alloc(64).unwrap().as_ptr();
        let _keep = allocator.alloc(64).unwrap();

        unsafe {
            allocator.dealloc(ptr);
            allocator.dealloc(ptr);

            let err = allocator.try_dealloc(ptr).unwrap_err();
            assert!(matches!(err, Error::CallerMisuse { kind: Misuse::DoubleFree, .. }));
        }

        assert_eq!(allocator.stats().misuse_count, 2);
        assert_eq!(allocator.stats().dealloc_count, 1);
        allocator.check().unwrap();
    }
}
