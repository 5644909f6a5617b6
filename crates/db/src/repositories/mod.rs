//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods
//! that accept `&PgPool` as the first argument.

pub mod network_node_repo;

pub use network_node_repo::{NetworkNodeRepo, SlotWrite};
