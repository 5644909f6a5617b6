//! Pure domain layer for the sponsorship network.
//!
//! Holds the binary-tree node model, slot ordering, breadth-first slot
//! search and statistics aggregation. Nothing in this crate performs I/O;
//! the `db` and `placement` crates load data and pass it in.

pub mod error;
pub mod network;
pub mod sponsorship;
pub mod types;
