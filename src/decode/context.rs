//! Fixed pool of decode contexts.
//!
//! A context is one unit of decode capacity: "a decode task may be in flight
//! here". The pool is sized once and never grows, so context indices are
//! stable for the life of the decoder.
//!
//! ```text
//!   contexts: [ c0 ][ c1 ][ c2 ][ c3 ]
//!               │           │
//!   free list:  c0 ───────► c2          c1, c3 busy (unlinked, may hold a task)
//! ```
//!
//! # Invariants
//! - A context is free iff it is linked into the free list.
//! - `free_count() + busy_count() == len()` at all times.
//! - Only busy contexts hold a task handle.
//! - Each acquire bumps the context generation; a handle is bound only when
//!   the caller's ticket matches the current generation.

use crate::stdx::{IndexList, ListLink, ListNode};

#[derive(Debug)]
pub(crate) struct FreeContextTag;

/// Proof of ownership of one busy context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ContextTicket {
    index: u32,
    generation: u64,
}

impl ContextTicket {
    #[inline]
    pub(crate) fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct DecodeContext<T> {
    task: Option<T>,
    generation: u64,
    link: ListLink<FreeContextTag>,
}

impl<T> ListNode<FreeContextTag> for DecodeContext<T> {
    #[inline]
    fn list_link(&self) -> &ListLink<FreeContextTag> {
        &self.link
    }

    #[inline]
    fn list_link_mut(&mut self) -> &mut ListLink<FreeContextTag> {
        &mut self.link
    }
}

#[derive(Debug)]
pub(crate) struct ContextPool<T> {
    contexts: Vec<DecodeContext<T>>,
    free: IndexList<FreeContextTag>,
}

impl<T: Clone> ContextPool<T> {
    /// Creates `count` contexts, all free, acquired in index order.
    pub(crate) fn new(count: u32) -> Self {
        assert!(count > 0, "context pool needs at least one context");

        let mut contexts: Vec<DecodeContext<T>> = (0..count)
            .map(|_| DecodeContext {
                task: None,
                generation: 0,
                link: ListLink::new(),
            })
            .collect();
        let mut free = IndexList::new();
        for index in 0..count {
            free.push_back(&mut contexts, index);
        }

        Self { contexts, free }
    }

    #[inline]
    pub(crate) fn len(&self) -> u32 {
        self.contexts.len() as u32
    }

    #[inline]
    pub(crate) fn free_count(&self) -> u32 {
        self.free.len()
    }

    #[inline]
    pub(crate) fn busy_count(&self) -> u32 {
        self.len() - self.free_count()
    }

    /// Takes a free context, or `None` if every context is busy.
    pub(crate) fn acquire(&mut self) -> Option<ContextTicket> {
        let index = self.free.pop_front(&mut self.contexts)?;
        let ctx = &mut self.contexts[index as usize];
        assert!(ctx.task.is_none(), "free context {index} holds a task");
        ctx.generation += 1;

        Some(ContextTicket {
            index,
            generation: ctx.generation,
        })
    }

    /// Records the task running on a busy context.
    ///
    /// Returns `false` (and drops `task`) if the ticket is stale, which
    /// happens when the task finished and released the context before its
    /// handle could be bound.
    pub(crate) fn bind_task(&mut self, ticket: ContextTicket, task: T) -> bool {
        let ctx = &mut self.contexts[ticket.index as usize];
        if !ctx.link.is_unlinked() || ctx.generation != ticket.generation {
            return false;
        }
        assert!(ctx.task.is_none(), "context {} already bound", ticket.index);
        ctx.task = Some(task);
        true
    }

    /// Returns a busy context to the free list, dropping its task handle.
    ///
    /// # Panics
    /// If the ticket does not own the context.
    pub(crate) fn release(&mut self, ticket: ContextTicket) {
        let ctx = &mut self.contexts[ticket.index as usize];
        assert!(ctx.link.is_unlinked(), "releasing free context {}", ticket.index);
        assert_eq!(
            ctx.generation, ticket.generation,
            "releasing context {} with stale ticket",
            ticket.index
        );
        ctx.task = None;
        self.free.push_back(&mut self.contexts, ticket.index);

        #[cfg(debug_assertions)]
        self.check_invariants();
    }

    /// Clone of the task handle bound to context `index`, if any.
    pub(crate) fn task(&self, index: u32) -> Option<T> {
        self.contexts
            .get(index as usize)
            .and_then(|ctx| ctx.task.clone())
    }

    #[cfg(debug_assertions)]
    pub(crate) fn check_invariants(&self) {
        self.free.check_invariants(&self.contexts);
        let unlinked = self
            .contexts
            .iter()
            .filter(|ctx| ctx.link.is_unlinked())
            .count() as u32;
        assert_eq!(unlinked, self.busy_count(), "free/busy partition broken");
        assert!(
            self.contexts
                .iter()
                .all(|ctx| ctx.link.is_unlinked() || ctx.task.is_none()),
            "free context holds a task"
        );
    }
}
