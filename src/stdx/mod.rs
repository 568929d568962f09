//! Small, self-contained data structures used across the crate.

pub mod index_list;

pub use index_list::{IndexList, LinkArena, ListLink, ListNode};
