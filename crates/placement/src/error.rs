use std::time::Duration;

use sponsornet_core::error::CoreError;
use sponsornet_core::network::Side;
use sponsornet_core::types::DbId;

/// Failures reported by a [`NodeStore`](crate::store::NodeStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer filled the slot first. Nothing was written.
    #[error("Slot {side} of node {parent_id} is already occupied")]
    SlotOccupied { parent_id: DbId, side: Side },

    #[error("User {user_id} already holds a network node")]
    DuplicateMember { user_id: DbId },

    #[error("Sponsorship code '{0}' is already taken")]
    DuplicateCode(String),

    #[error("The network already has a root")]
    RootExists,

    #[error("Node {0} not found")]
    NotFound(DbId),

    #[error("Node store call timed out after {0:?}")]
    Timeout(Duration),

    /// A row or a set of rows broke a tree invariant.
    #[error(transparent)]
    Integrity(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Database(_))
    }
}

/// Failures reported by a [`PositionCache`](crate::cache::PositionCache).
///
/// Never surfaced to placement callers: any cache failure sends the
/// planner down the fallback scan.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Position cache backend is unavailable")]
    Unavailable,

    #[error("Position cache call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Position cache backend error: {0}")]
    Backend(String),
}

/// Errors returned to callers of [`Planner::place`](crate::planner::Planner::place).
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("No active member with sponsorship code '{0}'")]
    SponsorNotFound(String),

    /// The scan ran out of nodes without finding an open slot. With
    /// unbounded depth this means the stored tree is corrupt.
    #[error("No open slot found under sponsor node {sponsor_id}")]
    PlacementExhausted { sponsor_id: DbId },

    #[error("Placement failed after {attempts} attempts: {reason}")]
    PlacementFailed { attempts: u32, reason: String },

    #[error("Placement cancelled before the node was written")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from subtree and statistics reads.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("No network node for user {0}")]
    NotFound(DbId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from rebuilding a position queue out of the store.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    #[error("Node {0} not found")]
    NotFound(DbId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<CoreError> for RebuildError {
    fn from(err: CoreError) -> Self {
        Self::Store(StoreError::Integrity(err))
    }
}

impl From<CoreError> for MaterializeError {
    fn from(err: CoreError) -> Self {
        Self::Store(StoreError::Integrity(err))
    }
}

impl From<CoreError> for PlacementError {
    fn from(err: CoreError) -> Self {
        Self::Store(StoreError::Integrity(err))
    }
}
