//! Network node model and DTOs.

use serde::{Deserialize, Serialize};
use sponsornet_core::error::CoreError;
use sponsornet_core::network::{Node, Position, Side};
use sponsornet_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `network_nodes` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NetworkNode {
    pub id: DbId,
    pub user_id: DbId,
    pub sponsor_id: Option<DbId>,
    pub parent_id: Option<DbId>,
    pub left_child_id: Option<DbId>,
    pub right_child_id: Option<DbId>,
    pub level: i32,
    pub position: String,
    pub sponsorship_code: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl NetworkNode {
    /// Convert to the domain node, checking the per-row invariants.
    pub fn into_domain(self) -> Result<Node, CoreError> {
        let node = Node {
            id: self.id,
            user_id: self.user_id,
            sponsor_id: self.sponsor_id,
            parent_id: self.parent_id,
            left_child_id: self.left_child_id,
            right_child_id: self.right_child_id,
            level: self.level,
            position: Position::from_str_value(&self.position)?,
            sponsorship_code: self.sponsorship_code,
            is_active: self.is_active,
        };
        node.validate()?;
        Ok(node)
    }
}

/// DTO for creating the network root.
#[derive(Debug, Deserialize)]
pub struct CreateRootNode {
    pub user_id: DbId,
    pub sponsorship_code: String,
}

/// DTO for attaching a member under `parent_id` on `side`.
#[derive(Debug, Deserialize)]
pub struct CreateNetworkNode {
    pub parent_id: DbId,
    pub side: Side,
    pub user_id: DbId,
    pub sponsor_id: DbId,
    pub sponsorship_code: String,
}
