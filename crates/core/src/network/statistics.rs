//! Downline statistics for dashboards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::network::node::Side;
use crate::network::snapshot::SubtreeSnapshot;
use crate::types::DbId;

/// Aggregate counts for the subtree below one member.
///
/// All counts exclude the root member itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStatistics {
    pub total_downline: u64,
    /// Members in the subtree under the root's left child.
    pub left_count: u64,
    /// Members in the subtree under the root's right child.
    pub right_count: u64,
    /// Members who registered with the root's sponsorship code.
    pub direct_referrals: u64,
    /// Deepest level below the root (0 when there is no downline).
    pub max_depth: u32,
    pub active_count: u64,
}

impl TreeStatistics {
    /// Aggregate a snapshot. Pass an unbounded snapshot for exact counts.
    pub fn from_snapshot(snapshot: &SubtreeSnapshot) -> Self {
        let root = snapshot.root();
        let mut stats = Self::default();
        // Which of the root's two legs each node belongs to.
        let mut leg: HashMap<DbId, Side> = HashMap::with_capacity(snapshot.len());

        for entry in snapshot.nodes().iter().skip(1) {
            let node = &entry.node;
            let side = if node.parent_id == Some(root.id) {
                node.position.side()
            } else {
                node.parent_id.and_then(|p| leg.get(&p).copied())
            };

            match side {
                Some(Side::Left) => stats.left_count += 1,
                Some(Side::Right) => stats.right_count += 1,
                None => {}
            }
            if let Some(side) = side {
                leg.insert(node.id, side);
            }

            stats.total_downline += 1;
            if node.is_active {
                stats.active_count += 1;
            }
            if node.sponsor_id == Some(root.id) {
                stats.direct_referrals += 1;
            }
            stats.max_depth = stats.max_depth.max(entry.depth);
        }

        stats
    }
}
