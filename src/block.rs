use std::{mem, ptr::NonNull};

use crate::{
    list::Node,
    utils::{MIN_ALIGN, align},
};

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of the
/// region's block list, rounded so that payloads stay aligned.
pub(crate) const BLOCK_HEADER_SIZE: usize = align(mem::size_of::<Node<Block>>(), MIN_ALIGN);

/// Tag written in every live header. A pointer whose header does not carry
/// it was never handed out by the pool (or was absorbed by a merge).
pub(crate) const BLOCK_MAGIC: u32 = 0xDA7A_B10C;

/// This is the structure of a block. The fields of the block are its
/// metadata, content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |     next / prev     |        |
/// +---------------------+        |
/// |        size         |        | -> Header (Node<Block>)
/// +---------------------+        |
/// |  magic | is_free    |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// Blocks are physically adjacent: the next block's header starts right
/// after this block's content.
pub(crate) struct Block {
    /// Size of the content in bytes.
    pub size: usize,
    /// Set to [`BLOCK_MAGIC`] while the header is live.
    pub magic: u32,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

impl Block {
    pub fn new(size: usize, is_free: bool) -> Self {
        Self {
            size,
            magic: BLOCK_MAGIC,
            is_free,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == BLOCK_MAGIC
    }

    /// Invalidates the header once the block has been merged into a
    /// neighbour, so stale pointers to it are rejected.
    #[inline]
    pub fn retire(&mut self) {
        self.magic = 0;
    }
}

/// Address of the content of `node`.
#[inline]
pub(crate) fn payload(node: NonNull<Node<Block>>) -> NonNull<u8> {
    unsafe { node.cast::<u8>().add(BLOCK_HEADER_SIZE) }
}

/// Header of the block whose content starts at `ptr`.
///
/// **SAFETY**: `ptr - BLOCK_HEADER_SIZE` must lie inside the same mapping.
#[inline]
pub(crate) unsafe fn header(ptr: NonNull<u8>) -> NonNull<Node<Block>> {
    unsafe { ptr.sub(BLOCK_HEADER_SIZE).cast() }
}

/// Address where the header of the block following `node` starts.
#[inline]
pub(crate) fn end(node: NonNull<Node<Block>>) -> usize {
    unsafe { payload(node).as_ptr() as usize + node.as_ref().data.size }
}
