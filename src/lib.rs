//! Allocator front-end over a DAX device or any memory-mapped file.
//!
//! A [`MemoryProvider`] maps a fixed range of the device, a [`Pool`] carves
//! that range up with a pluggable strategy, and an [`Allocator`] ties the two
//! together behind `init`, `alloc`, `dealloc` and `finalize`:
//!
//! ```no_run
//! use daxalloc::{Allocator, PoolConfig};
//!
//! let allocator = Allocator::new(PoolConfig::new());
//! allocator.init("/dev/dax0.0", 1 << 30)?;
//!
//! let ptr = allocator.alloc(4096).expect("pool exhausted");
//! unsafe { allocator.dealloc(ptr.as_ptr()) };
//!
//! allocator.finalize();
//! # Ok::<(), daxalloc::InitError>(())
//! ```
//!
//! The [`global`] module offers the same operations over a process-wide
//! allocator with C-style status codes, [`TieredAlloc`] plugs an allocator in
//! as the `#[global_allocator]` behind a DRAM budget, and the `ffi` feature
//! exports the process-wide functions to C.

mod allocator;
mod block;
mod config;
mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
mod freelist;
pub mod global;
mod list;
mod pool;
mod provider;
mod region;
mod stats;
mod strategy;
mod tiered;
mod utils;

pub use allocator::{Allocator, State};
pub use config::{AllocatorConfig, DEFAULT_DAX_PATH, PoolConfig, PoolKind};
pub use error::{Error, InitError, Misuse, Result, STATUS_OK};
pub use pool::Pool;
pub use provider::{MemoryProvider, ProviderParams};
pub use stats::{Resources, Snapshot, Stats, resources};
pub use tiered::TieredAlloc;
pub use utils::MIN_ALIGN;
