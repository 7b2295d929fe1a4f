//! A [`GlobalAlloc`] that spends a DRAM budget first and then moves to a
//! device-backed [`Allocator`].
//!
//! Every allocation is preceded by a 16-byte header recording where the memory
//! really came from, so `dealloc` does not need to guess the tier:
//!
//! ```text
//!  backend pointer            user pointer
//!  v                          v
//!  +---------+--------+-------+-----------------------+
//!  | padding | Header |       user data (size)        |
//!  +---------+--------+-------+-----------------------+
//!            ^ 16 bytes
//! ```
//!
//! ```no_run
//! use daxalloc::{Allocator, PoolConfig, TieredAlloc};
//!
//! static FAR: Allocator = Allocator::new(PoolConfig::new());
//!
//! #[global_allocator]
//! static GLOBAL: TieredAlloc<'static> = TieredAlloc::new(&FAR, 512 << 20);
//!
//! fn main() {
//!     FAR.init("/dev/dax0.0", 64 << 30).unwrap();
//!     let big = vec![0u8; 1 << 30];
//!     # drop(big);
//! }
//! ```
//!
//! The far tier is only ever probed without blocking, so code that
//! allocates while `init` or `finalize` holds the far allocator is served
//! from DRAM instead of deadlocking. Far blocks can only be released
//! without blocking while a pool is live; one released while the pool is
//! being built or torn down belongs to no pool and is dropped with it.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    mem,
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{allocator::Allocator, utils::align};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tier {
    Dram = 0,
    Far = 1,
}

#[repr(C, align(16))]
struct Header {
    /// Pointer returned by the backend.
    origin: *mut u8,
    tier: Tier,
}

const HEADER_SIZE: usize = mem::size_of::<Header>();
const HEADER_ALIGN: usize = mem::align_of::<Header>();

/// Global allocator over DRAM and a far tier.
pub struct TieredAlloc<'a> {
    far: &'a Allocator,
    dram_limit: usize,
    /// Bytes requested by callers that are currently served from DRAM.
    dram_in_use: AtomicUsize,
}

impl<'a> TieredAlloc<'a> {
    /// Serves requests from DRAM while the bytes already handed out plus the
    /// request stay within `dram_limit`, and from `far` afterwards.
    pub const fn new(far: &'a Allocator, dram_limit: usize) -> Self {
        Self {
            far,
            dram_limit,
            dram_in_use: AtomicUsize::new(0),
        }
    }

    /// Bytes currently served from DRAM.
    pub fn dram_in_use(&self) -> usize {
        self.dram_in_use.load(Ordering::Relaxed)
    }

    pub fn dram_limit(&self) -> usize {
        self.dram_limit
    }

    /// Takes `size` bytes out of the DRAM budget, or fails if they do not
    /// fit. Concurrent callers can never overshoot `dram_limit` together.
    fn reserve_dram(&self, size: usize) -> bool {
        self.dram_in_use
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |in_use| {
                in_use
                    .checked_add(size)
                    .filter(|&total| total <= self.dram_limit)
            })
            .is_ok()
    }

    /// Serves from the reserved budget, returning the reservation on failure.
    fn alloc_reserved_dram(&self, total: usize, size: usize) -> Option<NonNull<u8>> {
        let base = system_alloc(total);

        if base.is_none() {
            self.dram_in_use.fetch_sub(size, Ordering::Relaxed);
        }

        base
    }

    /// Serves from DRAM past the budget, once the far tier has refused.
    fn alloc_overflow_dram(&self, total: usize, size: usize) -> Option<NonNull<u8>> {
        let base = system_alloc(total)?;

        self.dram_in_use.fetch_add(size, Ordering::Relaxed);
        Some(base)
    }
}

fn system_alloc(total: usize) -> Option<NonNull<u8>> {
    let layout = Layout::from_size_align(total, HEADER_ALIGN).ok()?;

    NonNull::new(unsafe { System.alloc(layout) })
}

/// Bytes to request from a backend for `layout`, given that every backend
/// returns [`HEADER_ALIGN`]-aligned memory.
fn padded_size(layout: &Layout) -> Option<usize> {
    let slack = layout.align().max(HEADER_ALIGN) - HEADER_ALIGN;

    layout.size().checked_add(HEADER_SIZE)?.checked_add(slack)
}

unsafe impl GlobalAlloc for TieredAlloc<'_> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(total) = padded_size(&layout) else {
            return ptr::null_mut();
        };

        let size = layout.size();

        let backend = if self.reserve_dram(size) {
            self.alloc_reserved_dram(total, size).map(|base| (base, Tier::Dram))
        } else {
            self.far
                .try_alloc(total)
                .map(|base| (base, Tier::Far))
                .or_else(|| self.alloc_overflow_dram(total, size).map(|base| (base, Tier::Dram)))
        };

        let Some((base, tier)) = backend else {
            return ptr::null_mut();
        };

        let user = align(
            base.as_ptr() as usize + HEADER_SIZE,
            layout.align().max(HEADER_ALIGN),
        );
        let offset = user - base.as_ptr() as usize;

        unsafe {
            let user = base.as_ptr().add(offset);

            user.sub(HEADER_SIZE).cast::<Header>().write(Header {
                origin: base.as_ptr(),
                tier,
            });

            user
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }

        let header = unsafe { ptr.sub(HEADER_SIZE).cast::<Header>().read() };

        match header.tier {
            Tier::Dram => {
                // `alloc` only hands out layouts `padded_size` accepted.
                let total = padded_size(&layout).unwrap_or(layout.size());

                unsafe {
                    System.dealloc(
                        header.origin,
                        Layout::from_size_align_unchecked(total, HEADER_ALIGN),
                    )
                };
                self.dram_in_use.fetch_sub(layout.size(), Ordering::Relaxed);
            }
            Tier::Far => {
                // `None` means no pool is live, so the block went with it.
                // Rejections are counted by the far allocator.
                let _ = unsafe { self.far.try_dealloc_nonblocking(header.origin) };
            }
        }
    }
}
