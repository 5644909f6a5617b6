//! Background worker for the placement engine.
//!
//! Keeps position queues built for the configured sponsor roots so the first
//! registration under a busy sponsor does not pay for a full subtree scan.

pub mod config;
pub mod warmer;
