//! Node storage for intrusive lists.

pub mod slab;

pub use slab::Slab;
