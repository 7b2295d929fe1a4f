//! Installs [`TieredAlloc`] as the global allocator: the first 1 MiB of heap
//! comes from DRAM, everything after it from a memory-mapped file.

use daxalloc::{Allocator, PoolConfig, TieredAlloc};

static FAR: Allocator = Allocator::new(PoolConfig::new());

#[global_allocator]
static GLOBAL: TieredAlloc<'static> = TieredAlloc::new(&FAR, 1 << 20);

fn main() {
    let backing = tempfile::NamedTempFile::new().unwrap();
    backing.as_file().set_len(256 << 20).unwrap();

    FAR.init(backing.path(), 256 << 20).unwrap();

    let small = vec![1u8; 512 << 10];
    println!("512 KiB vec at {:p}, far: {}", small.as_ptr(), FAR.owns(small.as_ptr()));

    let big = vec![2u8; 4 << 20];
    println!("4 MiB vec at {:p}, far: {}", big.as_ptr(), FAR.owns(big.as_ptr()));

    println!("DRAM in use: {} bytes", GLOBAL.dram_in_use());
    println!("Far tier in use: {} bytes", FAR.bytes_in_use());

    drop(big);
    drop(small);

    FAR.finalize();
}
