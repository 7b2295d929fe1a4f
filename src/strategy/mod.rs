//! Allocation strategies a [`crate::Pool`] can run over its mapped range.
//!
//! A strategy owns all per-allocation metadata; the pool and the facade never
//! track allocations themselves. Strategies are `Send` but not `Sync`: the
//! pool serializes every call through its mutex.

mod fixed;
mod general;

use std::ptr::NonNull;

pub(crate) use fixed::FixedSize;
pub(crate) use general::GeneralPurpose;

use crate::{
    config::{PoolConfig, PoolKind},
    error::Result,
};

pub(crate) trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Largest request an empty pool can satisfy.
    fn capacity(&self) -> usize;

    /// Bytes currently handed out, as rounded by the strategy.
    fn bytes_in_use(&self) -> usize;

    /// Returns a region of at least `size` bytes inside the mapping, aligned
    /// to [`crate::utils::MIN_ALIGN`], or `None` when `size` is zero or
    /// nothing fits.
    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Returns `ptr` to the free space and reports how many bytes it held.
    /// Pointers that were not handed out by `malloc` are rejected when the
    /// strategy can tell.
    ///
    /// **SAFETY**: `ptr` should come from `malloc` on this strategy. Misuse
    /// is detected best-effort only.
    unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<usize>;

    /// Zeroes every byte a later `malloc` could hand out. Only meaningful on a
    /// pool without live allocations.
    fn scrub(&mut self);

    /// Walks the metadata and reports the first inconsistency found.
    fn check(&self) -> Result<()>;
}

/// Builds the strategy selected by `config` over `base..base + len`.
///
/// **SAFETY**: the range must be mapped, writable, and outlive the returned
/// strategy.
pub(crate) unsafe fn build(
    config: &PoolConfig,
    base: NonNull<u8>,
    len: usize,
) -> Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match config.kind {
        PoolKind::GeneralPurpose => Box::new(unsafe { GeneralPurpose::new(base, len) }?),
        PoolKind::FixedSize => Box::new(unsafe { FixedSize::new(base, len, config.block_size) }?),
    };

    Ok(strategy)
}
