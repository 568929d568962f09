//! Growable slab of fixed-type nodes addressed by stable `u32` indices.
//!
//! Nodes are constructed into vacant slots and destroyed back onto an
//! embedded free list, so steady-state construct/destroy is O(1) and never
//! touches the global allocator once the slab has grown to its high-water
//! mark. Indices stay valid until the node is destroyed, which is what lets
//! [`IndexList`](crate::stdx::IndexList) link slab nodes intrusively.
//!
//! The slab is not synchronized; callers serialize access (the decoder holds
//! its state mutex around every call).

use crate::stdx::{LinkArena, ListLink, ListNode};

enum Slot<T> {
    Occupied(T),
    Vacant { next_free: Option<u32> },
}

/// Slab allocator with LIFO slot reuse.
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    live: u32,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Creates a slab with `capacity` slots reserved upfront.
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            slots: Vec::with_capacity(capacity as usize),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> u32 {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated (live + vacant).
    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Moves `value` into a slot and returns its index.
    ///
    /// Reuses the most recently destroyed slot when one exists.
    pub fn construct(&mut self, value: T) -> u32 {
        let index = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let Slot::Vacant { next_free } = *slot else {
                    panic!("slab free list points at occupied slot {index}");
                };
                self.free_head = next_free;
                *slot = Slot::Occupied(value);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("slab index overflow");
                assert!(index < u32::MAX, "slab index overflow");
                self.slots.push(Slot::Occupied(value));
                index
            }
        };

        self.live += 1;
        assert!(self.live <= self.slot_count());
        index
    }

    /// Removes the node at `index` and returns it.
    ///
    /// # Panics
    /// If `index` is out of range or already vacant (double destroy).
    pub fn destroy(&mut self, index: u32) -> T {
        let slot = self
            .slots
            .get_mut(index as usize)
            .unwrap_or_else(|| panic!("slab index {index} out of range"));
        assert!(
            matches!(slot, Slot::Occupied(_)),
            "destroying vacant slab slot {index}"
        );

        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(index);
        self.live -= 1;

        match old {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => unreachable!("checked occupied above"),
        }
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        match self.slots.get(index as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        match self.slots.get_mut(index as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    #[inline]
    fn occupied(&self, index: u32) -> &T {
        self.get(index)
            .unwrap_or_else(|| panic!("slab slot {index} is vacant"))
    }

    #[inline]
    fn occupied_mut(&mut self, index: u32) -> &mut T {
        self.get_mut(index)
            .unwrap_or_else(|| panic!("slab slot {index} is vacant"))
    }
}

impl<T: ListNode<Tag>, Tag> LinkArena<Tag> for Slab<T> {
    #[inline]
    fn link(&self, index: u32) -> &ListLink<Tag> {
        self.occupied(index).list_link()
    }

    #[inline]
    fn link_mut(&mut self, index: u32) -> &mut ListLink<Tag> {
        self.occupied_mut(index).list_link_mut()
    }
}
