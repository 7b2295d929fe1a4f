//! First-fit allocation over an address-ordered block list.
//!
//! Block headers and free list nodes live inside the mapped region (see
//! [`crate::block`] and [`crate::freelist`]). Allocation splits the first
//! free block large enough; free coalesces with both physical neighbours, so
//! two free blocks are never adjacent.

use std::{
    mem,
    ptr::{self, NonNull},
};

use super::Strategy;
use crate::{
    block::{self, BLOCK_HEADER_SIZE},
    error::{Error, Misuse, Result},
    freelist::{FreeList, FreeNode, MIN_BLOCK_SIZE},
    region::Region,
    utils::{MIN_ALIGN, align_down, checked_align},
};

const NAME: &str = "general_purpose";

pub(crate) struct GeneralPurpose {
    region: Region,
    free_list: FreeList,
    /// Payload of the single block an empty region holds.
    capacity: usize,
    in_use: usize,
}

// Every pointer inside refers to the mapped region, which the owning pool
// keeps alive and whose access it serializes.
unsafe impl Send for GeneralPurpose {}

impl GeneralPurpose {
    /// **SAFETY**: `base..base + len` must be mapped and writable for the
    /// lifetime of the strategy.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Result<Self> {
        let init_failed = |reason: String| Error::StrategyInitFailed {
            strategy: NAME,
            size: len,
            reason,
        };

        if base.as_ptr() as usize % MIN_ALIGN != 0 {
            return Err(init_failed(format!(
                "base {base:p} is not {MIN_ALIGN}-byte aligned"
            )));
        }

        let size = align_down(len, MIN_ALIGN);

        if size < BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(init_failed(format!(
                "at least {} bytes are needed for a single block",
                BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE
            )));
        }

        let (region, first) = unsafe { Region::new(base, size) };

        let mut free_list = FreeList::new();
        unsafe { free_list.insert(first) };

        Ok(Self {
            region,
            free_list,
            capacity: size - BLOCK_HEADER_SIZE,
            in_use: 0,
        })
    }
}

fn inconsistent(msg: String) -> Error {
    Error::Inconsistent(msg)
}

impl Strategy for GeneralPurpose {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn bytes_in_use(&self) -> usize {
        self.in_use
    }

    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > self.capacity {
            return None;
        }

        // Every block must be able to hold its free list node later on.
        let needed = checked_align(size, MIN_ALIGN)?.max(MIN_BLOCK_SIZE);

        let mut node = self.free_list.find_first_fit(needed)?;

        unsafe {
            self.free_list.remove(node);

            if let Some(rest) = self.region.split(node, needed) {
                self.free_list.insert(rest);
            }

            let block = &mut node.as_mut().data;
            block.is_free = false;
            self.in_use += block.size;
        }

        let payload = block::payload(node);

        // The free list node lived here; allocator pointers must not leak
        // into caller memory.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, mem::size_of::<FreeNode>()) };

        Some(payload)
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<usize> {
        let addr = ptr.as_ptr() as usize;

        if addr < self.region.start() + BLOCK_HEADER_SIZE || addr >= self.region.end() {
            return Err(Error::misuse(addr, Misuse::OutOfRange));
        }

        if addr % MIN_ALIGN != 0 {
            return Err(Error::misuse(addr, Misuse::Misaligned));
        }

        let mut node = unsafe { block::header(ptr) };

        let (valid, is_free, size) = {
            let block = unsafe { &node.as_ref().data };
            (block.is_valid(), block.is_free, block.size)
        };

        if !valid || size > self.region.end() - addr {
            return Err(Error::misuse(addr, Misuse::UnknownBlock));
        }

        if is_free {
            return Err(Error::misuse(addr, Misuse::DoubleFree));
        }

        self.in_use -= size;

        unsafe {
            self.region.merge_with_next(&mut node, &mut self.free_list);
            self.region.merge_with_prev(&mut node, &mut self.free_list);
            self.free_list.insert(node);
        }

        Ok(size)
    }

    fn scrub(&mut self) {
        if self.in_use != 0 {
            return;
        }

        // Nothing is live, so the region is a single free block.
        if let Some(ptr) = self.malloc(self.capacity) {
            unsafe { ptr::write_bytes(ptr.as_ptr(), 0, self.capacity) };

            let freed = unsafe { self.free(ptr) };
            debug_assert!(freed.is_ok());
        }
    }

    fn check(&self) -> Result<()> {
        let mut expected = self.region.start();
        let mut prev_free = false;
        let mut free_blocks = 0;
        let mut walked = 0;
        let mut used = 0;

        let mut cursor = self.region.blocks.first();

        while let Some(node) = cursor {
            let addr = node.as_ptr() as usize;

            if addr != expected {
                return Err(inconsistent(format!(
                    "block at 0x{addr:x}, expected one at 0x{expected:x}"
                )));
            }

            let block = unsafe { &node.as_ref().data };

            if !block.is_valid() {
                return Err(inconsistent(format!("block at 0x{addr:x} has a corrupt header")));
            }

            if block.is_free {
                if prev_free {
                    return Err(inconsistent(format!(
                        "free block at 0x{addr:x} was not coalesced with its predecessor"
                    )));
                }
                free_blocks += 1;
            } else {
                used += block.size;
            }

            prev_free = block.is_free;
            expected = block::end(node);
            walked += 1;

            cursor = unsafe { node.as_ref().next };
        }

        if walked != self.region.blocks.len() {
            return Err(inconsistent(format!(
                "walked {walked} blocks, list holds {}",
                self.region.blocks.len()
            )));
        }

        if expected != self.region.end() {
            return Err(inconsistent(format!(
                "blocks end at 0x{expected:x}, region ends at 0x{:x}",
                self.region.end()
            )));
        }

        if free_blocks != self.free_list.len() {
            return Err(inconsistent(format!(
                "{free_blocks} free blocks but {} free list entries",
                self.free_list.len()
            )));
        }

        if let Some(node) = self
            .free_list
            .iter()
            .find(|node| unsafe { !node.as_ref().data.is_free })
        {
            return Err(inconsistent(format!(
                "listed block at 0x{:x} is in use",
                node.as_ptr() as usize
            )));
        }

        if used != self.in_use {
            return Err(inconsistent(format!(
                "blocks in use hold {used} bytes, counter says {}",
                self.in_use
            )));
        }

        Ok(())
    }
}
