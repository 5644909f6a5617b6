//! Level-by-level breadth-first search for the next open slot.
//!
//! The caller drives the loop and does the I/O: inspect the current
//! [`Frontier`], and if it has no open slot, load the nodes named by
//! [`Frontier::child_ids`] and call [`Frontier::advance`]. One store round
//! trip per level keeps the scan usable for trees of any depth.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::network::node::{Node, Side};
use crate::network::path::TreePath;
use crate::network::slot::AvailablePosition;
use crate::types::DbId;

/// All nodes of one level of a sponsor subtree, left to right.
#[derive(Debug, Clone)]
pub struct Frontier {
    root_sponsor_id: DbId,
    entries: Vec<(Node, TreePath)>,
}

impl Frontier {
    /// Begin a scan at the sponsor node itself.
    pub fn start(sponsor: Node, sponsor_path: TreePath) -> Self {
        Self {
            root_sponsor_id: sponsor.id,
            entries: vec![(sponsor, sponsor_path)],
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Absolute level of the nodes in this frontier.
    #[cfg(test)]
    fn level(&self) -> Option<i32> {
        self.entries.first().map(|(node, _)| node.level)
    }

    /// The leftmost empty slot on this level, preferring a node's left slot
    /// over its right one.
    pub fn first_open_slot(&self) -> Option<AvailablePosition> {
        self.entries.iter().find_map(|(node, path)| {
            node.first_open_side()
                .map(|side| AvailablePosition::under(self.root_sponsor_id, node, path, side))
        })
    }

    /// Ids of the next level, in breadth-first order.
    pub fn child_ids(&self) -> Vec<DbId> {
        self.entries
            .iter()
            .flat_map(|(node, _)| node.children())
            .collect()
    }

    /// Build the next level from the loaded children (any order).
    ///
    /// Fails if a child pointer names a node that was not supplied, or if a
    /// supplied child does not point back at its parent on the same side.
    pub fn advance(&self, children: Vec<Node>) -> Result<Self, CoreError> {
        let mut by_id: HashMap<DbId, Node> = children.into_iter().map(|n| (n.id, n)).collect();
        let mut next = Vec::with_capacity(self.entries.len() * 2);

        for (node, path) in &self.entries {
            for side in Side::ORDER {
                let Some(child_id) = node.child(side) else {
                    continue;
                };
                let child = by_id.remove(&child_id).ok_or_else(|| {
                    CoreError::Internal(format!(
                        "Node {} points at missing {side} child {child_id}",
                        node.id
                    ))
                })?;
                if child.parent_id != Some(node.id) || child.position.side() != Some(side) {
                    return Err(CoreError::Internal(format!(
                        "Node {child_id} does not hang {side} of node {}",
                        node.id
                    )));
                }
                next.push((child, path.child(side)));
            }
        }

        Ok(Self {
            root_sponsor_id: self.root_sponsor_id,
            entries: next,
        })
    }
}
