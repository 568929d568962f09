//! Property-based tests for decoder scheduling invariants.
//!
//! Run with: `cargo test --test property`

mod decoder_model;
