//! Pending-request queue.
//!
//! Requests that find no free context wait here in FIFO order. Each waiting
//! request lives in a slab-allocated [`QueueEntry`] linked into an
//! [`IndexList`], so steady-state queueing reuses entry slots instead of
//! allocating.
//!
//! An entry may also be *detached*: popped from the list but still allocated,
//! so a synchronous drain can put a chained request back into the same slot.

use crate::pool::Slab;
use crate::stdx::{IndexList, ListLink, ListNode};

use super::request::ChunkBlockDecodeRequest;

#[derive(Debug)]
pub(crate) struct PendingTag;

/// Handle to a detached queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EntryId(u32);

struct QueueEntry {
    request: Option<ChunkBlockDecodeRequest>,
    link: ListLink<PendingTag>,
}

impl ListNode<PendingTag> for QueueEntry {
    #[inline]
    fn list_link(&self) -> &ListLink<PendingTag> {
        &self.link
    }

    #[inline]
    fn list_link_mut(&mut self) -> &mut ListLink<PendingTag> {
        &mut self.link
    }
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    entries: Slab<QueueEntry>,
    queue: IndexList<PendingTag>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Requests waiting in the queue (detached entries excluded).
    #[inline]
    pub(crate) fn len(&self) -> u32 {
        self.queue.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Entries currently allocated, queued or detached.
    #[inline]
    pub(crate) fn allocated(&self) -> u32 {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, request: ChunkBlockDecodeRequest) {
        let index = self.entries.construct(QueueEntry {
            request: Some(request),
            link: ListLink::new(),
        });
        self.queue.push_back(&mut self.entries, index);
    }

    /// Pops the oldest request and frees its entry.
    pub(crate) fn pop(&mut self) -> Option<ChunkBlockDecodeRequest> {
        let index = self.queue.pop_front(&mut self.entries)?;
        let entry = self.entries.destroy(index);
        Some(Self::occupied(entry.request, index))
    }

    /// Pops the oldest request but keeps its entry allocated.
    ///
    /// The entry must later be passed to [`requeue_entry`](Self::requeue_entry)
    /// or [`destroy_entry`](Self::destroy_entry).
    pub(crate) fn pop_entry(&mut self) -> Option<(EntryId, ChunkBlockDecodeRequest)> {
        let index = self.queue.pop_front(&mut self.entries)?;
        let entry = self.entry_mut(index);
        let request = Self::occupied(entry.request.take(), index);
        Some((EntryId(index), request))
    }

    /// Fills a detached entry with `request` and appends it at the tail.
    pub(crate) fn requeue_entry(&mut self, id: EntryId, request: ChunkBlockDecodeRequest) {
        let entry = self.entry_mut(id.0);
        assert!(entry.request.is_none(), "requeueing occupied entry {}", id.0);
        entry.request = Some(request);
        self.queue.push_back(&mut self.entries, id.0);
    }

    /// Frees a detached entry.
    pub(crate) fn destroy_entry(&mut self, id: EntryId) {
        let entry = self.entries.destroy(id.0);
        assert!(entry.link.is_unlinked(), "destroying queued entry {}", id.0);
        assert!(entry.request.is_none(), "destroying occupied entry {}", id.0);
    }

    fn entry_mut(&mut self, index: u32) -> &mut QueueEntry {
        self.entries
            .get_mut(index)
            .unwrap_or_else(|| panic!("queue entry {index} is vacant"))
    }

    fn occupied(
        request: Option<ChunkBlockDecodeRequest>,
        index: u32,
    ) -> ChunkBlockDecodeRequest {
        request.unwrap_or_else(|| panic!("queued entry {index} holds no request"))
    }
}

impl std::fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.len())
            .field("allocated", &self.allocated())
            .finish()
    }
}
