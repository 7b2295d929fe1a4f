//! Equal-sized slots carved out of the region.
//!
//! Untouched slots are handed out by bumping an index; freed slots go on an
//! intrusive stack whose links live in the slots themselves. A bitmap kept
//! off the device records which slots are live, which is what makes double
//! frees detectable.

use std::ptr::{self, NonNull};

use super::Strategy;
use crate::{
    error::{Error, Misuse, Result},
    utils::{MIN_ALIGN, checked_align},
};

const NAME: &str = "fixed_size";
const WORD_BITS: usize = u64::BITS as usize;

/// Link stored in the first bytes of a recycled slot.
type SlotLink = Option<NonNull<u8>>;

pub(crate) struct FixedSize {
    base: NonNull<u8>,
    block_size: usize,
    slots: usize,
    /// Slots below this index have been handed out at least once.
    touched: usize,
    /// Top of the stack of recycled slots.
    recycled: SlotLink,
    /// One bit per slot, set while the slot is live.
    live_map: Vec<u64>,
    live: usize,
}

unsafe impl Send for FixedSize {}

impl FixedSize {
    /// **SAFETY**: `base..base + len` must be mapped and writable for the
    /// lifetime of the strategy.
    pub unsafe fn new(base: NonNull<u8>, len: usize, block_size: usize) -> Result<Self> {
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

        let block_size = checked_align(block_size, MIN_ALIGN)
            .filter(|&size| size > 0)
            .ok_or_else(|| init_failed(format!("block size {block_size} is unusable")))?;

        let slots = len / block_size;

        if slots == 0 {
            return Err(init_failed(format!("a {block_size}-byte slot does not fit")));
        }

        let words = slots.div_ceil(WORD_BITS);
        let mut live_map = Vec::new();

        live_map
            .try_reserve_exact(words)
            .map_err(|err| init_failed(format!("bitmap for {slots} slots: {err}")))?;
        live_map.resize(words, 0);

        Ok(Self {
            base,
            block_size,
            slots,
            touched: 0,
            recycled: None,
            live_map,
            live: 0,
        })
    }

    #[inline]
    fn start(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    fn end(&self) -> usize {
        self.start() + self.slots * self.block_size
    }

    #[inline]
    fn index_of(&self, slot: NonNull<u8>) -> usize {
        (slot.as_ptr() as usize - self.start()) / self.block_size
    }

    #[inline]
    fn is_live(&self, index: usize) -> bool {
        self.live_map[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    #[inline]
    fn set_live(&mut self, index: usize, live: bool) {
        let word = &mut self.live_map[index / WORD_BITS];
        let bit = 1 << (index % WORD_BITS);

        if live {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

impl Strategy for FixedSize {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capacity(&self) -> usize {
        self.block_size
    }

    fn bytes_in_use(&self) -> usize {
        self.live * self.block_size
    }

    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > self.block_size {
            return None;
        }

        let slot = match self.recycled {
            Some(slot) => unsafe {
                let link = slot.cast::<SlotLink>();
                self.recycled = link.read();
                link.write(None);
                slot
            },
            None if self.touched < self.slots => {
                let slot = unsafe { self.base.add(self.touched * self.block_size) };
                self.touched += 1;
                slot
            }
            None => return None,
        };

        self.set_live(self.index_of(slot), true);
        self.live += 1;

        Some(slot)
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<usize> {
        let addr = ptr.as_ptr() as usize;

        if addr < self.start() || addr >= self.end() {
            return Err(Error::misuse(addr, Misuse::OutOfRange));
        }

        if (addr - self.start()) % self.block_size != 0 {
            return Err(Error::misuse(addr, Misuse::Misaligned));
        }

        let index = self.index_of(ptr);

        if index >= self.touched {
            return Err(Error::misuse(addr, Misuse::UnknownBlock));
        }

        if !self.is_live(index) {
            return Err(Error::misuse(addr, Misuse::DoubleFree));
        }

        self.set_live(index, false);
        self.live -= 1;

        unsafe { ptr.cast::<SlotLink>().write(self.recycled) };
        self.recycled = Some(ptr);

        Ok(self.block_size)
    }

    fn scrub(&mut self) {
        if self.live != 0 {
            return;
        }

        unsafe { ptr::write_bytes(self.base.as_ptr(), 0, self.slots * self.block_size) };

        self.touched = 0;
        self.recycled = None;
    }

    fn check(&self) -> Result<()> {
        let marked: usize = self.live_map.iter().map(|word| word.count_ones() as usize).sum();

        if marked != self.live {
            return Err(Error::Inconsistent(format!(
                "{marked} slots marked live, counter says {}",
                self.live
            )));
        }

        let mut recycled = 0;
        let mut cursor = self.recycled;

        while let Some(slot) = cursor {
            let addr = slot.as_ptr() as usize;

            if recycled >= self.touched || addr < self.start() || addr >= self.end() {
                return Err(Error::Inconsistent(format!(
                    "recycled stack is corrupt at 0x{addr:x}"
                )));
            }

            if self.is_live(self.index_of(slot)) {
                return Err(Error::Inconsistent(format!(
                    "live slot at 0x{addr:x} is on the recycled stack"
                )));
            }

            recycled += 1;
            cursor = unsafe { slot.cast::<SlotLink>().read() };
        }

        if recycled + self.live != self.touched {
            return Err(Error::Inconsistent(format!(
                "{} touched slots, {} live and {recycled} recycled",
                self.touched, self.live
            )));
        }

        Ok(())
    }
}
