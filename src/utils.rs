//! Helper functions that don't particularly belong to any concrete module
//! of the allocator.

/// Minimum alignment of every pointer handed out by a pool. Block headers
/// and slot sizes are rounded to this value so payloads stay aligned.
pub const MIN_ALIGN: usize = 16;

/// It aligns `to_be_aligned` up to the next multiple of `alignment`.
///
/// `alignment` has to be a power of two. This is used to round block sizes
/// and header sizes to [`MIN_ALIGN`] because payload addresses derive from
/// them.
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but rounding down. Used to trim a mapped region to a
/// length the strategies can tile exactly.
pub const fn align_down(to_be_aligned: usize, alignment: usize) -> usize {
    to_be_aligned & !(alignment - 1)
}

/// Checked version of [`align`] for caller-provided sizes.
pub fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(alignment - 1)
        .map(|size| size & !(alignment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, mem::size_of::<usize>()));
            }
        }
    }

    #[test]
    fn align_to_min_align() {
        let aligments = vec![(1..16, 16), (17..32, 32), (33..48, 48)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, MIN_ALIGN));
            }
        }
    }

    #[test]
    fn align_down_trims_tail() {
        assert_eq!(align_down(4095, 16), 4080);
        assert_eq!(align_down(4096, 16), 4096);
        assert_eq!(align_down(15, 16), 0);
    }

    #[test]
    fn checked_align_detects_overflow() {
        assert_eq!(checked_align(17, 16), Some(32));
        assert_eq!(checked_align(usize::MAX, 16), None);
    }
}
