use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// A node of an intrusive [`List`]. Nodes never live on the Rust heap: the
/// list writes them at addresses inside the mapped region.
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Doubly linked list whose nodes are placed by the caller.
///
/// Only the head, tail and length are owned by the list itself, so the list
/// can be moved freely while its nodes stay where they were written.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    /// Appends a new node to the list.
    ///
    /// The list must not allocate, since it is the allocator's own
    /// bookkeeping. Therefore it receives the `addr` where the node has to be
    /// written.
    ///
    /// **SAFETY**: `addr` must be valid for writes of `Node<T>`, aligned, and
    /// must not overlap any other live node.
    pub unsafe fn append(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            if let Some(mut tail) = self.tail {
                tail.as_mut().next = Some(node);
            } else {
                self.head = Some(node);
            }
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Same as [`List::append`] but links the node at the head.
    ///
    /// **SAFETY**: same as [`List::append`].
    pub unsafe fn push_front(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: self.head,
                prev: None,
                data,
            });

            if let Some(mut head) = self.head {
                head.as_mut().prev = Some(node);
            } else {
                self.tail = Some(node);
            }
        }

        self.head = Some(node);
        self.len += 1;

        node
    }

    /// Writes a new node at `addr` and links it right after `anchor`.
    ///
    /// **SAFETY**: same as [`List::append`]; `anchor` must belong to this list.
    pub unsafe fn insert_after(
        &mut self,
        mut anchor: NonNull<Node<T>>,
        data: T,
        addr: NonNull<u8>,
    ) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            let next = anchor.as_ref().next;

            node.as_ptr().write(Node {
                next,
                prev: Some(anchor),
                data,
            });

            match next {
                Some(mut next) => next.as_mut().prev = Some(node),
                None => self.tail = Some(node),
            }

            anchor.as_mut().next = Some(node);
        }

        self.len += 1;

        node
    }

    /// Unlinks `node`. The memory it occupies is left untouched.
    ///
    /// **SAFETY**: `node` must belong to this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let prev = node.as_ref().prev;
            let next = node.as_ref().next;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
            self.remaining -= 1;

            Some(&node.as_ref().data)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn slot(buf: &mut [MaybeUninit<Node<u32>>], i: usize) -> NonNull<u8> {
        NonNull::from(&mut buf[i]).cast()
    }

    fn collect(list: &List<u32>) -> Vec<u32> {
        list.iter().copied().collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list: List<u8> = List::new();

        assert_eq!(list.len(), 0);
        assert!(list.first().is_none());
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn append_and_insert_after_keep_order() {
        let mut buf: [MaybeUninit<Node<u32>>; 4] = [const { MaybeUninit::uninit() }; 4];
        let mut list = List::new();

        unsafe {
            let first = list.append(1, slot(&mut buf, 0));
            list.append(3, slot(&mut buf, 1));
            list.insert_after(first, 2, slot(&mut buf, 2));
        }

        assert_eq!(collect(&list), vec![1, 2, 3]);
        assert_eq!(list.iter().size_hint(), (3, Some(3)));
    }

    #[test]
    fn push_front_links_at_head() {
        let mut buf: [MaybeUninit<Node<u32>>; 3] = [const { MaybeUninit::uninit() }; 3];
        let mut list = List::new();

        unsafe {
            list.push_front(2, slot(&mut buf, 0));
            list.push_front(1, slot(&mut buf, 1));
            list.append(3, slot(&mut buf, 2));
        }

        assert_eq!(collect(&list), vec![1, 2, 3]);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut buf: [MaybeUninit<Node<u32>>; 4] = [const { MaybeUninit::uninit() }; 4];
        let mut list = List::new();

        let nodes: Vec<_> = (0..4)
            .map(|i| unsafe { list.append(i as u32, slot(&mut buf, i)) })
            .collect();

        unsafe {
            list.remove(nodes[0]);
            assert_eq!(collect(&list), vec![1, 2, 3]);

            list.remove(nodes[2]);
            assert_eq!(collect(&list), vec![1, 3]);

            list.remove(nodes[3]);
            assert_eq!(collect(&list), vec![1]);

            list.remove(nodes[1]);
        }

        assert_eq!(list.len(), 0);
        assert!(list.first().is_none());
    }
}
