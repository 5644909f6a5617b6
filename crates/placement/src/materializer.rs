//! Read-side views of the tree: bounded subtree snapshots and downline
//! statistics.

use std::sync::Arc;

use sponsornet_core::network::{Node, SubtreeSnapshot, TreeStatistics};
use sponsornet_core::types::DbId;

use crate::cache::StatisticsCache;
use crate::error::MaterializeError;
use crate::store::NodeStore;

#[derive(Clone)]
pub struct TreeMaterializer {
    store: Arc<dyn NodeStore>,
    stats: Arc<StatisticsCache>,
}

impl TreeMaterializer {
    pub fn new(store: Arc<dyn NodeStore>, stats: Arc<StatisticsCache>) -> Self {
        Self { store, stats }
    }

    async fn member_node(&self, user_id: DbId) -> Result<Node, MaterializeError> {
        self.store
            .fetch_node_by_user(user_id)
            .await?
            .ok_or(MaterializeError::NotFound(user_id))
    }

    /// Snapshot of the member's subtree, at most `max_depth` levels below
    /// the member (`None` for the whole downline).
    pub async fn get_subtree(
        &self,
        user_id: DbId,
        max_depth: Option<u32>,
    ) -> Result<SubtreeSnapshot, MaterializeError> {
        let root = self.member_node(user_id).await?;
        let nodes = self.store.fetch_subtree(root.id, max_depth).await?;
        Ok(SubtreeSnapshot::build(root, nodes, max_depth)?)
    }

    /// Downline statistics for a member, served from the statistics cache
    /// while fresh.
    pub async fn get_statistics(&self, user_id: DbId) -> Result<TreeStatistics, MaterializeError> {
        if let Some(stats) = self.stats.get(user_id).await {
            tracing::debug!(user_id, "Statistics cache hit");
            return Ok(stats);
        }

        let snapshot = self.get_subtree(user_id, None).await?;
        let stats = TreeStatistics::from_snapshot(&snapshot);
        self.stats.insert(user_id, stats).await;
        Ok(stats)
    }
}
