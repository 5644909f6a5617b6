//! Bounded, read-only copies of a subtree.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::error::CoreError;
use crate::network::node::{Node, Side};
use crate::network::path::TreePath;
use crate::network::slot::AvailablePosition;
use crate::types::DbId;

/// A node together with its distance below the snapshot root.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotNode {
    #[serde(flatten)]
    pub node: Node,
    pub depth: u32,
}

/// Nodes reachable from a root, at most `max_depth` levels down, in
/// breadth-first left-first order with the root first.
///
/// Snapshots are rebuilt from the store on demand and never patched.
#[derive(Debug, Clone, Serialize)]
pub struct SubtreeSnapshot {
    max_depth: Option<u32>,
    nodes: Vec<SnapshotNode>,
}

impl SubtreeSnapshot {
    /// Assemble a snapshot from the root and a bag of its descendants.
    ///
    /// Descendants may arrive in any order; nodes deeper than `max_depth` or
    /// unreachable from `root` are dropped. A child pointer inside the depth
    /// bound that names a node missing from `descendants` is an error.
    pub fn build(
        root: Node,
        descendants: Vec<Node>,
        max_depth: Option<u32>,
    ) -> Result<Self, CoreError> {
        let mut by_id: HashMap<DbId, Node> = descendants
            .into_iter()
            .filter(|n| n.id != root.id)
            .map(|n| (n.id, n))
            .collect();

        let mut nodes = Vec::with_capacity(by_id.len() + 1);
        let mut queue = VecDeque::from([(root, 0u32)]);

        while let Some((node, depth)) = queue.pop_front() {
            if max_depth.map_or(true, |limit| depth < limit) {
                for side in Side::ORDER {
                    let Some(child_id) = node.child(side) else {
                        continue;
                    };
                    let child = by_id.remove(&child_id).ok_or_else(|| {
                        CoreError::Internal(format!(
                            "Subtree of node {} is missing {side} child {child_id}",
                            node.id
                        ))
                    })?;
                    queue.push_back((child, depth + 1));
                }
            }
            nodes.push(SnapshotNode { node, depth });
        }

        Ok(Self { max_depth, nodes })
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0].node
    }

    pub fn max_depth(&self) -> Option<u32> {
        self.max_depth
    }

    /// All nodes including the root, breadth-first.
    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    /// Node count including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A snapshot always holds its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, id: DbId) -> Option<&Node> {
        self.nodes.iter().map(|n| &n.node).find(|n| n.id == id)
    }

    /// Every empty slot of the snapshot's nodes, in queue order.
    ///
    /// `root_path` is the absolute path of the snapshot root. With a depth
    /// bound, slots below the boundary are not visible; callers rebuilding a
    /// position queue must use an unbounded snapshot.
    pub fn open_slots(&self, root_sponsor_id: DbId, root_path: &TreePath) -> Vec<AvailablePosition> {
        let mut paths: HashMap<DbId, TreePath> = HashMap::with_capacity(self.nodes.len());
        let mut slots = Vec::new();

        for (index, SnapshotNode { node, .. }) in self.nodes.iter().enumerate() {
            let path = if index == 0 {
                root_path.clone()
            } else {
                // Parents precede children in breadth-first order.
                let parent_path = node.parent_id.and_then(|p| paths.get(&p));
                match (parent_path, node.position.side()) {
                    (Some(parent_path), Some(side)) => parent_path.child(side),
                    _ => continue,
                }
            };
            slots.extend(AvailablePosition::open_slots_of(root_sponsor_id, node, &path));
            paths.insert(node.id, path);
        }

        slots
    }
}
