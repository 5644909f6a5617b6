//! Caller-facing entry point that owns and wires the engine components.

use std::sync::Arc;

use sponsornet_core::network::{Node, SubtreeSnapshot, TreeStatistics};
use sponsornet_core::sponsorship::generate_code;
use sponsornet_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::cache::{MemoryPositionCache, PositionCache, RedisPositionCache, StatisticsCache};
use crate::config::EngineConfig;
use crate::error::{CacheError, MaterializeError, PlacementError, RebuildError, StoreError};
use crate::maintainer::CacheMaintainer;
use crate::materializer::TreeMaterializer;
use crate::planner::{PlacementResult, Planner};
use crate::store::NodeStore;

/// Pick the position-cache backend: Redis when `redis_url` is set, process
/// memory otherwise.
pub fn position_cache_from_config(
    config: &EngineConfig,
) -> Result<Arc<dyn PositionCache>, CacheError> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!(prefix = %config.cache_key_prefix, "Using Redis position cache");
            Ok(Arc::new(RedisPositionCache::from_config(url, config)?))
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory position cache");
            Ok(Arc::new(MemoryPositionCache::new()))
        }
    }
}

/// Placement engine handle. Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct PlacementEngine {
    store: Arc<dyn NodeStore>,
    planner: Planner,
    maintainer: CacheMaintainer,
    materializer: TreeMaterializer,
}

impl PlacementEngine {
    pub fn new(
        store: Arc<dyn NodeStore>,
        cache: Arc<dyn PositionCache>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let stats = Arc::new(StatisticsCache::new(config.stats_ttl));
        let maintainer = CacheMaintainer::new(Arc::clone(&store), cache.clone(), Arc::clone(&stats));
        let planner = Planner::new(
            Arc::clone(&store),
            cache,
            maintainer.clone(),
            Arc::clone(&config),
        );
        let materializer = TreeMaterializer::new(Arc::clone(&store), Arc::clone(&stats));

        Self {
            store,
            planner,
            maintainer,
            materializer,
        }
    }

    /// Bootstrap an empty network with `user_id` as its root and build the
    /// root's position queue.
    pub async fn create_root(&self, user_id: DbId) -> Result<Node, StoreError> {
        let mut attempts = 0;
        let root = loop {
            attempts += 1;
            match self.store.create_root(user_id, &generate_code()).await {
                Err(StoreError::DuplicateCode(_)) if attempts < 3 => continue,
                other => break other?,
            }
        };
        tracing::info!(node_id = root.id, user_id, code = %root.sponsorship_code, "Network root created");

        if let Err(e) = self.maintainer.rebuild(root.id).await {
            tracing::warn!(root_id = root.id, error = %e, "Failed to build root position queue");
        }
        Ok(root)
    }

    /// Place a new member under the sponsor owning `sponsor_code`.
    pub async fn place_new_member(
        &self,
        sponsor_code: &str,
        user_id: DbId,
    ) -> Result<PlacementResult, PlacementError> {
        self.planner
            .place(sponsor_code, user_id, &CancellationToken::new())
            .await
    }

    /// Like [`Self::place_new_member`], abandoning the request if `cancel`
    /// fires before the node is written.
    pub async fn place_new_member_with_cancel(
        &self,
        sponsor_code: &str,
        user_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<PlacementResult, PlacementError> {
        self.planner.place(sponsor_code, user_id, cancel).await
    }

    pub async fn get_subtree(
        &self,
        user_id: DbId,
        max_depth: Option<u32>,
    ) -> Result<SubtreeSnapshot, MaterializeError> {
        self.materializer.get_subtree(user_id, max_depth).await
    }

    pub async fn get_statistics(&self, user_id: DbId) -> Result<TreeStatistics, MaterializeError> {
        self.materializer.get_statistics(user_id).await
    }

    /// Discard and rebuild the position queue of sponsor node `root_id`.
    pub async fn rebuild_position_cache(&self, root_id: DbId) -> Result<usize, RebuildError> {
        self.maintainer.rebuild(root_id).await
    }

    /// Build the queues of `root_ids` that are unbuilt or stale, or all of
    /// them with `force`. Returns how many were rebuilt.
    pub async fn warm_position_caches(&self, root_ids: &[DbId], force: bool) -> usize {
        self.maintainer.warm(root_ids, force).await
    }
}
