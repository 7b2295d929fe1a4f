use std::ptr::NonNull;

use crate::{
    block::{self, BLOCK_HEADER_SIZE, Block},
    freelist::{FreeList, MIN_BLOCK_SIZE},
    list::{List, Node},
};

/// The mapped range a general purpose pool carves blocks out of.
///
/// The region itself lives outside the mapping; only the blocks (and the
/// free list nodes inside free blocks) are written into it.
///
/// ```text
/// base                                                          base + size
/// +----------------------------------------------------------------------+
/// | +-------+    +-------+    +-------+    +-------+                     |
/// | | Block | -> | Block | -> | Block | -> | Block |                     |
/// | +-------+    +-------+    +-------+    +-------+                     |
/// +----------------------------------------------------------------------+
/// ```
///
/// Blocks tile the region without gaps, in address order.
pub(crate) struct Region {
    /// Start of the region
    pub base: NonNull<u8>,
    /// Size of the region in bytes
    pub size: usize,
    /// List of blocks in the region
    pub blocks: List<Block>,
}

impl Region {
    /// Lays a single block spanning the whole region.
    ///
    /// **SAFETY**: `base..base + size` must be writable, aligned to
    /// [`crate::utils::MIN_ALIGN`], and large enough for one header plus
    /// [`MIN_BLOCK_SIZE`].
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> (Self, NonNull<Node<Block>>) {
        let mut region = Self {
            base,
            size,
            blocks: List::new(),
        };

        let first = unsafe {
            region
                .blocks
                .append(Block::new(size - BLOCK_HEADER_SIZE, true), base)
        };

        (region, first)
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start() + self.size
    }

    /// Shrinks `node` to `size` bytes of payload if the rest is large enough
    /// to become a block of its own, and returns that new block.
    pub unsafe fn split(
        &mut self,
        mut node: NonNull<Node<Block>>,
        size: usize,
    ) -> Option<NonNull<Node<Block>>> {
        unsafe {
            let block = &mut node.as_mut().data;

            if block.size < size + BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE {
                return None;
            }

            let rest_size = block.size - size - BLOCK_HEADER_SIZE;
            block.size = size;

            let rest_addr = block::payload(node).add(size);

            Some(
                self.blocks
                    .insert_after(node, Block::new(rest_size, true), rest_addr),
            )
        }
    }

    /// Tries to merge the given block `node` with the previous one on the
    /// list. This can be performed if that previous block is free.
    ///
    /// The previous block is taken out of the free list; `node` becomes the
    /// merged block, which the caller has to list again.
    pub unsafe fn merge_with_prev(&mut self, node: &mut NonNull<Node<Block>>, free_list: &mut FreeList) {
        unsafe {
            let Some(mut prev_node) = node.as_ref().prev else {
                return;
            };

            if !prev_node.as_ref().data.is_free {
                return;
            }

            free_list.remove(prev_node);
            self.blocks.remove(*node);

            // Cover the header and the content of the absorbed block
            prev_node.as_mut().data.size += BLOCK_HEADER_SIZE + node.as_ref().data.size;
            node.as_mut().data.retire();

            *node = prev_node;
        }
    }

    /// Tries to merge the given block `node` with the next one on the list.
    /// This can be performed if that next block is free.
    pub unsafe fn merge_with_next(&mut self, node: &mut NonNull<Node<Block>>, free_list: &mut FreeList) {
        unsafe {
            let Some(mut next_node) = node.as_ref().next else {
                return;
            };

            if !next_node.as_ref().data.is_free {
                return;
            }

            free_list.remove(next_node);
            self.blocks.remove(next_node);

            node.as_mut().data.size += BLOCK_HEADER_SIZE + next_node.as_ref().data.size;
            next_node.as_mut().data.retire();
        }
    }
}
