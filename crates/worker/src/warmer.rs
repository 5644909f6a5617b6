//! Periodic position-queue warm-up.
//!
//! Runs on a fixed interval using `tokio::time::interval`. Each tick builds
//! the queues of the configured sponsors that are unbuilt or stale, which
//! covers queues lost to a Redis restart, discarded after a cache error, or
//! left behind while the cache was unreachable.

use std::time::Duration;

use sponsornet_core::sponsorship::validate_code;
use sponsornet_core::types::DbId;
use sponsornet_placement::store::NodeStore;
use sponsornet_placement::{PlacementEngine, StoreError};
use tokio_util::sync::CancellationToken;

/// Turn sponsorship codes into node ids. Unknown or malformed codes are
/// logged and skipped. With no codes, the network root is used.
pub async fn resolve_roots(store: &dyn NodeStore, codes: &[String]) -> Result<Vec<DbId>, StoreError> {
    if codes.is_empty() {
        return Ok(store.fetch_root().await?.map(|root| root.id).into_iter().collect());
    }

    let mut roots = Vec::with_capacity(codes.len());
    for raw in codes {
        let Ok(code) = validate_code(raw) else {
            tracing::warn!(code = %raw, "Ignoring malformed warm-up sponsor code");
            continue;
        };
        match store.fetch_node_by_code(&code).await? {
            Some(node) => roots.push(node.id),
            None => tracing::warn!(code = %code, "No member with warm-up sponsor code"),
        }
    }
    Ok(roots)
}

/// Run the warm-up loop until `cancel` is triggered.
///
/// The first tick fires immediately.
pub async fn run(
    engine: PlacementEngine,
    roots: Vec<DbId>,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        roots = roots.len(),
        interval_secs = every.as_secs(),
        "Position cache warmer started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Position cache warmer stopping");
                break;
            }
            _ = interval.tick() => {
                let rebuilt = engine.warm_position_caches(&roots, false).await;
                if rebuilt > 0 {
                    tracing::info!(rebuilt, "Position cache warmer: rebuilt queues");
                } else {
                    tracing::debug!("Position cache warmer: all queues built");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sponsornet_core::network::{NewNode, Side};
    use sponsornet_placement::cache::{MemoryPositionCache, PositionCache};
    use sponsornet_placement::store::MemoryNodeStore;
    use sponsornet_placement::EngineConfig;

    use super::*;

    #[tokio::test]
    async fn resolve_defaults_to_network_root() {
        let store = MemoryNodeStore::new();
        assert!(resolve_roots(&store, &[]).await.unwrap().is_empty());

        let root = store.create_root(1, "ROOTCODE").await.unwrap();
        assert_eq!(resolve_roots(&store, &[]).await.unwrap(), vec![root.id]);
    }

    #[tokio::test]
    async fn resolve_skips_unknown_codes() {
        let store = MemoryNodeStore::new();
        let root = store.create_root(1, "ROOTCODE").await.unwrap();
        let child = store
            .create_node_at_slot(&NewNode {
                parent_id: root.id,
                side: Side::Left,
                user_id: 2,
                sponsor_id: root.id,
                sponsorship_code: "CHILD002".to_string(),
            })
            .await
            .unwrap();

        let codes = vec![
            "child002".to_string(),
            "NOBODY99".to_string(),
            "??".to_string(),
        ];
        assert_eq!(resolve_roots(&store, &codes).await.unwrap(), vec![child.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn warmer_rebuilds_discarded_queue_until_cancelled() {
        let store = Arc::new(MemoryNodeStore::new());
        let cache = Arc::new(MemoryPositionCache::new());
        let engine = PlacementEngine::new(store.clone(), cache.clone(), EngineConfig::default());
        let root = engine.create_root(1).await.unwrap();
        cache.clear(root.id).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            engine,
            vec![root.id],
            Duration::from_secs(60),
            cancel.clone(),
        ));

        // The first tick is immediate.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.len(root.id).await.unwrap(), 2);

        cache.clear(root.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len(root.id).await.unwrap(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn warmer_rebuilds_queue_that_missed_placements() {
        let store = Arc::new(MemoryNodeStore::new());
        let cache = Arc::new(MemoryPositionCache::new());
        let engine = PlacementEngine::new(store.clone(), cache.clone(), EngineConfig::default());
        let root = engine.create_root(1).await.unwrap();
        engine.place_new_member(&root.sponsorship_code, 2).await.unwrap();

        cache.set_available(false);
        engine.place_new_member(&root.sponsorship_code, 3).await.unwrap();
        cache.set_available(true);
        // Still lists the right slot the outage placement filled.
        assert_eq!(cache.len(root.id).await.unwrap(), 3);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            engine,
            vec![root.id],
            Duration::from_secs(60),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let paths: Vec<_> = cache
            .entries(root.id)
            .await
            .iter()
            .map(|s| s.path.to_string())
            .collect();
        assert_eq!(paths, vec!["00", "01", "10", "11"]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
