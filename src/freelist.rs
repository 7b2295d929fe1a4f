use std::{mem, ptr::NonNull};

use crate::{
    block::{self, Block},
    list::{Link, List, Node},
    utils::{MIN_ALIGN, align},
};

/// Node of the free list, stored in the payload of the free block it points to.
pub(crate) type FreeNode = Node<NonNull<Node<Block>>>;

/// Smallest payload a block may have: it must be able to hold its own
/// [`FreeNode`] once it is freed.
pub(crate) const MIN_BLOCK_SIZE: usize = align(mem::size_of::<FreeNode>(), MIN_ALIGN);

/// Linked list to keep track of free [`Block`]s.
///
/// We use the payload of every free block as storage for its node in this
/// list. The payload is not used by anyone while the block is free:
///
/// ```text
/// +------------------------+ <--------+
/// |       Node<Block>      |          |-------> Block Header
/// +------------------------+ <--------+
/// |  FreeNode (next/prev/  |
/// |   pointer to header)   |
/// +------------------------+
/// |      Free Payload      |
/// |        (unused)        |
/// +------------------------+
/// ```
///
/// Since the node of a free block is always at the start of its payload,
/// removing a given block is O(1).
pub(crate) struct FreeList {
    items: List<NonNull<Node<Block>>>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { items: List::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Marks `block` as free and puts it at the head of the list, so the most
    /// recently freed block is the first candidate for reuse.
    ///
    /// **SAFETY**: `block` must be a live header with at least
    /// [`MIN_BLOCK_SIZE`] bytes of payload that is not already listed.
    pub unsafe fn insert(&mut self, mut block: NonNull<Node<Block>>) {
        unsafe {
            block.as_mut().data.is_free = true;
            self.items.push_front(block, block::payload(block));
        }
    }

    /// Removes `block` from the list.
    ///
    /// **SAFETY**: `block` must currently be listed.
    pub unsafe fn remove(&mut self, block: NonNull<Node<Block>>) {
        let node = block::payload(block).cast::<FreeNode>();

        unsafe { self.items.remove(node) }
    }

    /// Returns the first listed block with at least `size` bytes of payload
    /// (first-fit).
    pub fn find_first_fit(&self, size: usize) -> Link<Node<Block>> {
        self.items
            .iter()
            .find(|block| unsafe { block.as_ref().data.size >= size })
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NonNull<Node<Block>>> + '_ {
        self.items.iter().copied()
    }
}
