//! Access to the authoritative tree store.
//!
//! The engine never writes tree structure anywhere else. The one write
//! that matters, [`NodeStore::create_node_at_slot`], is a compare-and-set:
//! it succeeds only while the slot is still empty and otherwise reports
//! [`StoreError::SlotOccupied`] without touching the tree.

use async_trait::async_trait;
use sponsornet_core::network::{NewNode, Node};
use sponsornet_core::types::DbId;

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryNodeStore;
pub use postgres::PgNodeStore;

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn fetch_node(&self, id: DbId) -> Result<Option<Node>, StoreError>;

    async fn fetch_node_by_user(&self, user_id: DbId) -> Result<Option<Node>, StoreError>;

    /// Look up a node by its normalised sponsorship code.
    async fn fetch_node_by_code(&self, code: &str) -> Result<Option<Node>, StoreError>;

    async fn fetch_root(&self) -> Result<Option<Node>, StoreError>;

    /// Load several nodes at once; missing ids are skipped, order is
    /// unspecified.
    async fn fetch_nodes(&self, ids: &[DbId]) -> Result<Vec<Node>, StoreError>;

    /// Direct children, left first.
    async fn fetch_children(&self, id: DbId) -> Result<Vec<Node>, StoreError>;

    /// Ancestors of a node, nearest first, ending at the network root.
    async fn fetch_ancestors(&self, id: DbId) -> Result<Vec<Node>, StoreError>;

    /// The node `root_id` and its descendants down to `max_depth` levels
    /// below it (`None` for no bound). Order is unspecified.
    async fn fetch_subtree(
        &self,
        root_id: DbId,
        max_depth: Option<u32>,
    ) -> Result<Vec<Node>, StoreError>;

    /// Create the network root. Fails with [`StoreError::RootExists`] once a
    /// root is present.
    async fn create_root(&self, user_id: DbId, sponsorship_code: &str) -> Result<Node, StoreError>;

    /// Attach a member at `(input.parent_id, input.side)` if and only if the
    /// slot is empty. All fields of the new node commit together or not at
    /// all.
    async fn create_node_at_slot(&self, input: &NewNode) -> Result<Node, StoreError>;
}
