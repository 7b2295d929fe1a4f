use std::alloc::{GlobalAlloc, Layout};

use daxalloc::{Allocator, PoolConfig, TieredAlloc};
use tempfile::NamedTempFile;

const SIZE: usize = 1 << 20;

fn far(config: PoolConfig) -> (NamedTempFile, Allocator) {
    let file = NamedTempFile::new().unwrap();
    file.as_file().set_len(SIZE as u64).unwrap();

    let allocator = Allocator::new(config);
    allocator.init(file.path(), SIZE).unwrap();

    (file, allocator)
}

#[test]
fn spills_to_far_tier_past_the_dram_limit() {
    let (_file, far) = far(PoolConfig::new());
    let tiered = TieredAlloc::new(&far, 1024);

    let small = Layout::from_size_align(512, 8).unwrap();
    let big = Layout::from_size_align(4096, 8).unwrap();

    unsafe {
        let near = tiered.alloc(small);
        assert!(!near.is_null());
        assert!(!far.owns(near));
        assert_eq!(tiered.dram_in_use(), 512);

        let spilled = tiered.alloc(big);
        assert!(!spilled.is_null());
        assert!(far.owns(spilled));
        assert_eq!(tiered.dram_in_use(), 512);
        assert!(far.bytes_in_use() >= 4096);

        spilled.write_bytes(0x11, 4096);

        tiered.dealloc(spilled, big);
        tiered.dealloc(near, small);
    }

    assert_eq!(tiered.dram_in_use(), 0);
    assert_eq!(far.bytes_in_use(), 0);
    far.check().unwrap();
}

#[test]
fn honours_large_alignments_in_both_tiers() {
    let (_file, far) = far(PoolConfig::new());

    for limit in [usize::MAX, 0] {
        let tiered = TieredAlloc::new(&far, limit);

        for align in [1, 8, 16, 64, 4096] {
            let layout = Layout::from_size_align(100, align).unwrap();

            unsafe {
                let ptr = tiered.alloc(layout);
                assert!(!ptr.is_null());
                assert_eq!(ptr as usize % align, 0, "align {align}, limit {limit}");
                assert_eq!(far.owns(ptr), limit == 0);

                ptr.write_bytes(0x22, 100);
                tiered.dealloc(ptr, layout);
            }
        }
    }

    assert_eq!(far.bytes_in_use(), 0);
}

#[test]
fn falls_back_to_dram_when_far_tier_cannot_serve() {
    let (_file, far) = far(PoolConfig::fixed_size(64));
    let tiered = TieredAlloc::new(&far, 0);

    // Larger than a far slot once the header is added.
    let layout = Layout::from_size_align(64, 8).unwrap();

    unsafe {
        let ptr = tiered.alloc(layout);
        assert!(!ptr.is_null());
        assert!(!far.owns(ptr));
        assert_eq!(tiered.dram_in_use(), 64);

        tiered.dealloc(ptr, layout);
    }

    assert_eq!(tiered.dram_in_use(), 0);
}

#[test]
fn serves_from_dram_once_far_tier_is_finalized() {
    let (_file, far) = far(PoolConfig::new());
    let tiered = TieredAlloc::new(&far, 0);
    let layout = Layout::from_size_align(256, 16).unwrap();

    unsafe {
        let ptr = tiered.alloc(layout);
        assert!(far.owns(ptr));

        // `ptr` is gone with the mapping and must not be passed back.
        far.finalize();

        let fresh = tiered.alloc(layout);
        assert!(!fresh.is_null());
        assert!(!far.owns(fresh));
        tiered.dealloc(fresh, layout);
    }
}
