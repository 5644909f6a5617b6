//! Open child slots and their queue ordering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::network::node::{Node, Side};
use crate::network::path::TreePath;
use crate::types::DbId;

/// An empty `(parent, side)` slot inside a sponsor's subtree.
///
/// Entries are ordered by level, then by the path of the would-be child,
/// so the head of any queue of slots is the slot a breadth-first,
/// left-first scan of the same subtree would pick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailablePosition {
    /// Sponsor subtree (cache partition) this entry belongs to.
    pub root_sponsor_id: DbId,
    pub parent_node_id: DbId,
    pub side: Side,
    /// Level the child placed here would have.
    pub level: i32,
    /// Path the child placed here would have.
    pub path: TreePath,
}

impl AvailablePosition {
    /// Slot on `side` of `parent`, whose own path is `parent_path`.
    pub fn under(root_sponsor_id: DbId, parent: &Node, parent_path: &TreePath, side: Side) -> Self {
        Self {
            root_sponsor_id,
            parent_node_id: parent.id,
            side,
            level: parent.level + 1,
            path: parent_path.child(side),
        }
    }

    /// Every empty slot of `node`, in fill order.
    pub fn open_slots_of(root_sponsor_id: DbId, node: &Node, node_path: &TreePath) -> Vec<Self> {
        node.open_sides()
            .map(|side| Self::under(root_sponsor_id, node, node_path, side))
            .collect()
    }

    /// Same slot filed under another sponsor's queue.
    pub fn for_root(&self, root_sponsor_id: DbId) -> Self {
        Self {
            root_sponsor_id,
            ..self.clone()
        }
    }

    /// Identity of the slot regardless of which queue holds it.
    pub fn key(&self) -> (DbId, Side) {
        (self.parent_node_id, self.side)
    }
}

impl Ord for AvailablePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.path.cmp(&other.path))
            .then_with(|| self.parent_node_id.cmp(&other.parent_node_id))
            .then_with(|| self.side.cmp(&other.side))
            .then_with(|| self.root_sponsor_id.cmp(&other.root_sponsor_id))
    }
}

impl PartialOrd for AvailablePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
