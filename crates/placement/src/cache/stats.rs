use std::collections::HashMap;
use std::time::Duration;

use sponsornet_core::network::TreeStatistics;
use sponsornet_core::types::DbId;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Downline statistics keyed by member user id, each entry valid for `ttl`.
///
/// Entries are dropped by the maintainer whenever a placement lands below
/// the member; the TTL only bounds how long a missed invalidation can
/// linger.
pub struct StatisticsCache {
    ttl: Duration,
    entries: RwLock<HashMap<DbId, (Instant, TreeStatistics)>>,
}

impl StatisticsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: DbId) -> Option<TreeStatistics> {
        let entries = self.entries.read().await;
        entries
            .get(&user_id)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, stats)| *stats)
    }

    pub async fn insert(&self, user_id: DbId, stats: TreeStatistics) {
        let mut entries = self.entries.write().await;
        // Expired entries are swept on write so the map stays bounded by
        // the number of members read within one TTL.
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(user_id, (Instant::now(), stats));
    }

    pub async fn invalidate(&self, user_ids: &[DbId]) {
        let mut entries = self.entries.write().await;
        for user_id in user_ids {
            entries.remove(user_id);
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
