//! Per-sponsor queues of open slots, plus the statistics cache.
//!
//! A position queue for sponsor `S` holds every empty slot of `S`'s subtree,
//! ordered by [`AvailablePosition`]'s breadth-first order. Its head is the
//! slot a fresh breadth-first scan from `S` would pick. Only the
//! [`CacheMaintainer`](crate::maintainer::CacheMaintainer) enqueues; the
//! planner only dequeues.
//!
//! A queue that has never been built reads as empty. Because a subtree
//! always has at least one open slot, an empty queue means "not built yet"
//! and is reported as [`CacheLookup::Miss`].

use async_trait::async_trait;
use sponsornet_core::network::AvailablePosition;
use sponsornet_core::types::DbId;

use crate::error::CacheError;

pub mod memory;
pub mod redis_backend;
pub mod stats;

pub use memory::MemoryPositionCache;
pub use redis_backend::{RedisPolicy, RedisPositionCache};
pub use stats::StatisticsCache;

/// Outcome of popping the head of a position queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The slot was removed from the queue and now belongs to the caller.
    Hit(AvailablePosition),
    /// The queue is empty or was never built.
    Miss,
    /// The backend could not be reached.
    Unavailable,
}

#[async_trait]
pub trait PositionCache: Send + Sync {
    /// Cheap health probe. `false` means calls will fail right now.
    async fn is_available(&self) -> bool;

    /// Add slots to the queue of `root_id`. Re-adding a queued slot is a
    /// no-op.
    async fn enqueue(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError>;

    /// Atomically remove and return the head of the queue. Two concurrent
    /// callers never receive the same slot.
    async fn dequeue(&self, root_id: DbId) -> CacheLookup;

    /// Drop one slot from the queue of `root_id`. Returns whether it was
    /// present.
    async fn remove(&self, root_id: DbId, slot: &AvailablePosition) -> Result<bool, CacheError>;

    async fn len(&self, root_id: DbId) -> Result<usize, CacheError>;

    /// Swap the whole queue of `root_id` for `slots` in one step. Concurrent
    /// dequeues see either the old queue or the new one, never an empty gap.
    async fn replace(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError>;

    /// Discard the whole queue of `root_id`.
    async fn clear(&self, root_id: DbId) -> Result<(), CacheError>;
}
