//! Intrusive FIFO list over index handles with O(1) push/pop.
//!
//! Nodes live in an external arena (a `Vec`, a slice, or a [`Slab`]) and embed
//! a [`ListLink`]. The list itself stores only `head`/`tail` indices and a
//! length, so pushing and popping never allocates and never moves payloads.
//! The `Tag` type parameter lets one node type carry several links and sit in
//! several lists at once.
//!
//! # Ownership
//!
//! A node belongs to at most one list per tag. The `linked` flag enforces
//! this: pushing a node that is already linked panics, and popping or
//! removing a node clears the flag. Lists are move-only (no `Clone`);
//! [`IndexList::take_all`] transfers the whole chain and leaves the source
//! empty.
//!
//! [`Slab`]: crate::pool::Slab

use core::marker::PhantomData;

/// Intrusive link embedded in list nodes.
#[derive(Debug)]
pub struct ListLink<Tag> {
    next: Option<u32>,
    /// Tracks whether this node is currently in a list.
    /// Required because the tail has `next = None`, which would otherwise
    /// be indistinguishable from an unlinked node.
    linked: bool,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> ListLink<Tag> {
    pub const fn new() -> Self {
        Self {
            next: None,
            linked: false,
            _tag: PhantomData,
        }
    }

    /// Returns `true` if this node is not in any list for this tag.
    #[inline]
    pub fn is_unlinked(&self) -> bool {
        !self.linked
    }

    #[inline]
    fn unlink(&mut self) {
        self.next = None;
        self.linked = false;
    }
}

impl<Tag> Default for ListLink<Tag> {
    fn default() -> Self {
        Self::new()
    }
}

/// Types that embed a [`ListLink`] for `Tag`.
pub trait ListNode<Tag> {
    fn list_link(&self) -> &ListLink<Tag>;
    fn list_link_mut(&mut self) -> &mut ListLink<Tag>;
}

/// Storage that resolves node indices to their links.
///
/// Indices must stay valid (and refer to the same node) for as long as the
/// node is linked.
pub trait LinkArena<Tag> {
    fn link(&self, index: u32) -> &ListLink<Tag>;
    fn link_mut(&mut self, index: u32) -> &mut ListLink<Tag>;
}

impl<T: ListNode<Tag>, Tag> LinkArena<Tag> for [T] {
    #[inline]
    fn link(&self, index: u32) -> &ListLink<Tag> {
        self[index as usize].list_link()
    }

    #[inline]
    fn link_mut(&mut self, index: u32) -> &mut ListLink<Tag> {
        self[index as usize].list_link_mut()
    }
}

impl<T: ListNode<Tag>, Tag> LinkArena<Tag> for Vec<T> {
    #[inline]
    fn link(&self, index: u32) -> &ListLink<Tag> {
        self[index as usize].list_link()
    }

    #[inline]
    fn link_mut(&mut self, index: u32) -> &mut ListLink<Tag> {
        self[index as usize].list_link_mut()
    }
}

/// Intrusive FIFO list of node indices.
///
/// Uses `u32` length and indices. Panics on overflow (> 4B nodes).
#[derive(Debug)]
pub struct IndexList<Tag> {
    head: Option<u32>,
    tail: Option<u32>,
    len: u32,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> Default for IndexList<Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tag> IndexList<Tag> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _tag: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let empty = self.head.is_none();

        assert!(empty == self.tail.is_none());
        assert!(empty == (self.len == 0));

        empty
    }

    #[inline]
    pub fn len(&self) -> u32 {
        assert!((self.len == 0) == self.head.is_none());

        self.len
    }

    /// Returns the head index without removing it.
    #[inline]
    pub fn peek_front(&self) -> Option<u32> {
        self.head
    }

    /// Transfer all nodes to a new list, leaving `self` empty.
    pub fn take_all(&mut self) -> Self {
        let old_len = self.len;
        let taken = core::mem::take(self);

        assert!(self.is_empty());
        assert!(taken.len == old_len);

        taken
    }

    /// Append `index` at the back.
    ///
    /// # Panics
    /// - If the node is already linked
    /// - If the list length would overflow `u32::MAX`
    pub fn push_back<A>(&mut self, arena: &mut A, index: u32)
    where
        A: LinkArena<Tag> + ?Sized,
    {
        let old_len = self.len;

        assert!(
            arena.link(index).is_unlinked(),
            "pushing already-linked node"
        );
        assert!(old_len < u32::MAX, "list length overflow");

        let link = arena.link_mut(index);
        link.next = None;
        link.linked = true;

        match self.tail {
            None => {
                assert!(self.head.is_none());
                self.head = Some(index);
            }
            Some(tail) => {
                let tail_link = arena.link_mut(tail);
                assert!(tail_link.next.is_none(), "tail has a successor");
                tail_link.next = Some(index);
            }
        }
        self.tail = Some(index);
        self.len += 1;

        assert!(self.len == old_len + 1);
    }

    /// Splice every node of `other` onto the back of `self` in O(1).
    ///
    /// `other` is left empty. Both lists must share `arena`.
    pub fn append<A>(&mut self, arena: &mut A, other: &mut IndexList<Tag>)
    where
        A: LinkArena<Tag> + ?Sized,
    {
        let chain = other.take_all();
        let (Some(first), Some(last)) = (chain.head, chain.tail) else {
            return;
        };

        assert!(
            self.len.checked_add(chain.len).is_some(),
            "list length overflow"
        );
        assert!(arena.link(last).next.is_none(), "chain tail has a successor");

        match self.tail {
            None => self.head = Some(first),
            Some(tail) => arena.link_mut(tail).next = Some(first),
        }
        self.tail = Some(last);
        self.len += chain.len;
    }

    /// Remove and return the front index, or `None` if empty.
    ///
    /// The returned node is unlinked and safe to re-push.
    pub fn pop_front<A>(&mut self, arena: &mut A) -> Option<u32>
    where
        A: LinkArena<Tag> + ?Sized,
    {
        let head = self.head?;
        assert!(self.len > 0);

        let link = arena.link_mut(head);
        self.head = link.next;
        link.unlink();

        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;

        assert!(self.head.is_none() == (self.len == 0));
        Some(head)
    }

    /// O(n) removal of `index`. Returns whether it was found.
    pub fn remove<A>(&mut self, arena: &mut A, index: u32) -> bool
    where
        A: LinkArena<Tag> + ?Sized,
    {
        if arena.link(index).is_unlinked() {
            return false;
        }

        let mut prev: Option<u32> = None;
        let mut current = self.head;
        let mut visited: u32 = 0;

        while let Some(node) = current {
            visited += 1;
            assert!(visited <= self.len, "cycle detected in list");

            let next = arena.link(node).next;
            if node == index {
                match prev {
                    None => self.head = next,
                    Some(p) => arena.link_mut(p).next = next,
                }
                if self.tail == Some(index) {
                    self.tail = prev;
                }
                arena.link_mut(index).unlink();
                self.len -= 1;
                return true;
            }

            prev = current;
            current = next;
        }

        false
    }

    /// O(n) membership check.
    pub fn contains<A>(&self, arena: &A, index: u32) -> bool
    where
        A: LinkArena<Tag> + ?Sized,
    {
        self.iter(arena).any(|node| node == index)
    }

    /// Iterate indices front to back.
    pub fn iter<'a, A>(&self, arena: &'a A) -> Iter<'a, A, Tag>
    where
        A: LinkArena<Tag> + ?Sized,
    {
        Iter {
            arena,
            current: self.head,
            remaining: self.len,
            _tag: PhantomData,
        }
    }

    /// Panic if internal invariants are violated. Debug builds only.
    #[cfg(debug_assertions)]
    pub fn check_invariants<A>(&self, arena: &A)
    where
        A: LinkArena<Tag> + ?Sized,
    {
        if self.len == 0 {
            assert!(self.head.is_none(), "len=0 but head is Some");
            assert!(self.tail.is_none(), "len=0 but tail is Some");
            return;
        }

        let mut count: u32 = 0;
        let mut last = None;
        let mut current = self.head;
        while let Some(node) = current {
            count += 1;
            assert!(count <= self.len, "more nodes than len indicates");
            assert!(!arena.link(node).is_unlinked(), "listed node not linked");
            last = current;
            current = arena.link(node).next;
        }

        assert!(
            count == self.len,
            "counted {} nodes but len is {}",
            count,
            self.len
        );
        assert!(last == self.tail, "last node is not tail");
    }
}

/// Front-to-back iterator over list indices.
pub struct Iter<'a, A: ?Sized, Tag> {
    arena: &'a A,
    current: Option<u32>,
    remaining: u32,
    _tag: PhantomData<fn() -> Tag>,
}

impl<A, Tag> Iterator for Iter<'_, A, Tag>
where
    A: LinkArena<Tag> + ?Sized,
{
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let node = self.current?;
        assert!(self.remaining > 0, "cycle detected in list");
        self.remaining -= 1;
        self.current = self.arena.link(node).next;
        Some(node)
    }
}
