//! Engine-level placement tests against the in-memory store and cache.
//!
//! Covers:
//! - Breadth-first, left-first fill with and without the position cache
//! - Placements under inner sponsors and queue consistency across sponsors
//! - Cache discard and rebuild
//! - Queue recovery after outages and failed dequeues
//! - Sponsor resolution, idempotent retries, cancellation and give-up paths

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{
    occupied_slots, test_config, CancellingCache, FlakyCache, Harness, HookedStore, ROOT_USER,
};
use sponsornet_core::network::{Side, TreePath};
use sponsornet_core::types::DbId;
use sponsornet_placement::cache::{MemoryPositionCache, PositionCache};
use sponsornet_placement::store::{MemoryNodeStore, NodeStore};
use sponsornet_placement::{EngineConfig, PlacementEngine, PlacementError, SlotSource};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// In a tree filled breadth-first from an empty root, node ids follow heap
/// numbering: node `id` hangs under `id / 2`, on the left when `id` is even.
fn heap_slot(id: DbId) -> (DbId, Side) {
    let side = if id % 2 == 0 { Side::Left } else { Side::Right };
    (id / 2, side)
}

async fn fill_sequentially(h: &Harness, code: &str, count: DbId) -> Vec<SlotSource> {
    let mut sources = Vec::new();
    for i in 1..=count {
        let result = h.engine.place_new_member(code, ROOT_USER + i).await.unwrap();
        assert_eq!(
            (result.parent_node_id, result.side),
            heap_slot(result.node.id),
            "placement {i} broke breadth-first order"
        );
        assert_eq!(result.node.sponsor_id, Some(1));
        sources.push(result.source);
    }
    sources
}

// ---------------------------------------------------------------------------
// Tests: fill order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sequential_fill_is_breadth_first() {
    let h = Harness::new();
    let root = h.root().await;

    let sources = fill_sequentially(&h, &root.sponsorship_code, 14).await;
    assert!(sources.iter().all(|s| *s == SlotSource::Cache));

    // Level 3 is next: the queue holds exactly the 16 slots under level 3.
    let queue = h.cache.entries(root.id).await;
    assert_eq!(queue.len(), 16);
    assert!(queue.iter().all(|s| s.level == 4));
    assert_eq!(queue[0].parent_node_id, 8);
}

#[tokio::test]
async fn test_three_placements() {
    let h = Harness::new();
    let root = h.root().await;
    let code = root.sponsorship_code.clone();

    let a = h.engine.place_new_member(&code, 2001).await.unwrap();
    let b = h.engine.place_new_member(&code, 2002).await.unwrap();
    let c = h.engine.place_new_member(&code, 2003).await.unwrap();

    assert_eq!((a.parent_node_id, a.side, a.level), (root.id, Side::Left, 1));
    assert_eq!((b.parent_node_id, b.side, b.level), (root.id, Side::Right, 1));
    assert_eq!((c.parent_node_id, c.side, c.level), (a.node.id, Side::Left, 2));

    let root = h.store.fetch_node(root.id).await.unwrap().unwrap();
    assert_eq!(root.left_child_id, Some(a.node.id));
    assert_eq!(root.right_child_id, Some(b.node.id));
}

#[tokio::test]
async fn test_cache_down_gives_same_sequence() {
    let h = Harness::new();
    let root = h.root().await;
    h.cache.set_available(false);

    let sources = fill_sequentially(&h, &root.sponsorship_code, 14).await;
    assert!(sources.iter().all(|s| *s == SlotSource::Scan));
}

#[tokio::test]
async fn test_cache_outage_midway_keeps_order() {
    let h = Harness::new();
    let root = h.root().await;
    let code = root.sponsorship_code.clone();

    for i in 1..=3 {
        h.engine.place_new_member(&code, ROOT_USER + i).await.unwrap();
    }
    h.cache.set_available(false);
    for i in 4..=6 {
        let r = h.engine.place_new_member(&code, ROOT_USER + i).await.unwrap();
        assert_eq!(r.source, SlotSource::Scan);
        assert_eq!((r.parent_node_id, r.side), heap_slot(r.node.id));
    }

    // The queue missed three placements. The first placement after the
    // outage rebuilds it; later ones trust it again.
    h.cache.set_available(true);
    for i in 7..=14 {
        let r = h.engine.place_new_member(&code, ROOT_USER + i).await.unwrap();
        let expected = if i == 7 { SlotSource::Scan } else { SlotSource::Cache };
        assert_eq!(r.source, expected, "placement {i}");
        assert_eq!(
            (r.parent_node_id, r.side),
            heap_slot(r.node.id),
            "placement {i} broke breadth-first order"
        );
    }
}

#[tokio::test]
async fn test_failed_dequeue_does_not_build_partial_queue() {
    let store = Arc::new(MemoryNodeStore::new());
    let cache = Arc::new(FlakyCache::default());
    let engine = PlacementEngine::new(store.clone(), cache.clone(), test_config());
    let root = engine.create_root(ROOT_USER).await.unwrap();
    for i in 1..=4 {
        engine
            .place_new_member(&root.sponsorship_code, ROOT_USER + i)
            .await
            .unwrap();
    }
    let a = store.fetch_node(2).await.unwrap().unwrap();
    assert_eq!((a.left_child_id, a.right_child_id), (Some(4), Some(5)));

    // A's queue was never built and its one dequeue fails.
    cache.fail_next_dequeues(1);
    let first = engine.place_new_member(&a.sponsorship_code, 2001).await.unwrap();
    assert_eq!(first.source, SlotSource::Scan);
    assert_eq!((first.parent_node_id, first.side, first.level), (4, Side::Left, 3));
    assert!(cache.inner.entries(a.id).await.is_empty());

    let second = engine.place_new_member(&a.sponsorship_code, 2002).await.unwrap();
    assert_eq!((second.parent_node_id, second.side, second.level), (4, Side::Right, 3));

    let third = engine.place_new_member(&a.sponsorship_code, 2003).await.unwrap();
    assert_eq!(third.source, SlotSource::Cache);
    assert_eq!((third.parent_node_id, third.side, third.level), (5, Side::Left, 3));
}

#[tokio::test]
async fn test_placement_under_inner_sponsor() {
    let h = Harness::new();
    let root = h.root().await;
    let a = h
        .engine
        .place_new_member(&root.sponsorship_code, 2001)
        .await
        .unwrap()
        .node;

    // A's queue is unbuilt: the first placement under A scans and builds it.
    let x = h.engine.place_new_member(&a.sponsorship_code, 2002).await.unwrap();
    assert_eq!(x.source, SlotSource::Scan);
    assert_eq!((x.parent_node_id, x.side), (a.id, Side::Left));
    assert_eq!(x.node.sponsor_id, Some(a.id));

    let y = h.engine.place_new_member(&root.sponsorship_code, 2003).await.unwrap();
    assert_eq!((y.parent_node_id, y.side), (root.id, Side::Right));

    let z = h.engine.place_new_member(&a.sponsorship_code, 2004).await.unwrap();
    assert_eq!(z.source, SlotSource::Cache);
    assert_eq!((z.parent_node_id, z.side), (a.id, Side::Right));

    // Root's queue saw both placements under A, so level 2 continues
    // under Y.
    let w = h.engine.place_new_member(&root.sponsorship_code, 2005).await.unwrap();
    assert_eq!(w.source, SlotSource::Cache);
    assert_eq!((w.parent_node_id, w.side), (y.node.id, Side::Left));

    // Every queued slot lies inside its sponsor's subtree.
    let a_path = TreePath::parse("0").unwrap();
    assert!(h
        .cache
        .entries(a.id)
        .await
        .iter()
        .all(|s| s.path.is_within(&a_path)));
}

// ---------------------------------------------------------------------------
// Tests: rebuild and statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_discarded_cache_rebuilds_identically() {
    let h = Harness::new();
    let root = h.root().await;
    fill_sequentially(&h, &root.sponsorship_code, 6).await;

    let before = h.cache.entries(root.id).await;
    h.cache.clear(root.id).await.unwrap();
    assert!(h.cache.entries(root.id).await.is_empty());

    let queued = h.engine.rebuild_position_cache(root.id).await.unwrap();
    assert_eq!(queued, before.len());
    assert_eq!(h.cache.entries(root.id).await, before);

    h.engine.rebuild_position_cache(root.id).await.unwrap();
    assert_eq!(h.cache.entries(root.id).await, before);
}

#[tokio::test]
async fn test_empty_queue_falls_back_and_rebuilds() {
    let h = Harness::new();
    let root = h.root().await;
    h.cache.clear(root.id).await.unwrap();

    let first = h.engine.place_new_member(&root.sponsorship_code, 2001).await.unwrap();
    assert_eq!(first.source, SlotSource::Scan);
    assert_eq!(h.cache.len(root.id).await.unwrap(), 3);

    let second = h.engine.place_new_member(&root.sponsorship_code, 2002).await.unwrap();
    assert_eq!(second.source, SlotSource::Cache);
    assert_eq!(second.side, Side::Right);
}

#[tokio::test]
async fn test_statistics_track_placements() {
    let h = Harness::new();
    let root = h.root().await;
    let code = root.sponsorship_code.clone();

    let empty = h.engine.get_statistics(ROOT_USER).await.unwrap();
    assert_eq!(empty.total_downline, 0);

    let a = h.engine.place_new_member(&code, 2001).await.unwrap();
    h.engine.place_new_member(&code, 2002).await.unwrap();
    h.engine
        .place_new_member(&a.node.sponsorship_code, 2003)
        .await
        .unwrap();

    // Cached statistics were invalidated by the placements.
    let stats = h.engine.get_statistics(ROOT_USER).await.unwrap();
    let subtree = h.engine.get_subtree(ROOT_USER, None).await.unwrap();
    assert_eq!(stats.total_downline as usize, subtree.len() - 1);
    assert_eq!(stats.left_count, 2);
    assert_eq!(stats.right_count, 1);
    assert_eq!(stats.direct_referrals, 2);
    assert_eq!(stats.max_depth, 2);

    let a_stats = h.engine.get_statistics(2001).await.unwrap();
    assert_eq!(a_stats.total_downline, 1);
    assert_eq!(a_stats.direct_referrals, 1);
}

#[tokio::test]
async fn test_subtree_depth_limit() {
    let h = Harness::new();
    let root = h.root().await;
    fill_sequentially(&h, &root.sponsorship_code, 6).await;

    let snapshot = h.engine.get_subtree(ROOT_USER, Some(1)).await.unwrap();
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.nodes().iter().all(|n| n.depth <= 1));
}

// ---------------------------------------------------------------------------
// Tests: error paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_or_inactive_sponsor() {
    let h = Harness::new();
    let root = h.root().await;

    assert_matches!(
        h.engine.place_new_member("NOSUCHCODE", 2001).await,
        Err(PlacementError::SponsorNotFound(_))
    );
    assert_matches!(
        h.engine.place_new_member("bad!", 2001).await,
        Err(PlacementError::SponsorNotFound(_))
    );

    let a = h
        .engine
        .place_new_member(&root.sponsorship_code, 2001)
        .await
        .unwrap()
        .node;
    assert!(h.store.set_active(a.id, false).await);
    assert_matches!(
        h.engine.place_new_member(&a.sponsorship_code, 2002).await,
        Err(PlacementError::SponsorNotFound(code)) if code == a.sponsorship_code
    );
}

#[tokio::test]
async fn test_code_lookup_is_case_insensitive() {
    let h = Harness::new();
    let root = h.root().await;
    let code = format!("  {}  ", root.sponsorship_code.to_lowercase());

    let placed = h.engine.place_new_member(&code, 2001).await.unwrap();
    assert_eq!(placed.parent_node_id, root.id);
}

#[tokio::test]
async fn test_repeated_registration_returns_existing_node() {
    let h = Harness::new();
    let root = h.root().await;
    let code = root.sponsorship_code.clone();

    let first = h.engine.place_new_member(&code, 2001).await.unwrap();
    let queue = h.cache.entries(root.id).await;

    let again = h.engine.place_new_member(&code, 2001).await.unwrap();
    assert_eq!(again.source, SlotSource::Existing);
    assert_eq!(again.node.id, first.node.id);
    assert_eq!((again.parent_node_id, again.side), (root.id, Side::Left));

    // The slot taken from the queue for the retry was handed back.
    assert_eq!(h.cache.entries(root.id).await, queue);
    assert_eq!(h.store.len().await, 2);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new();
    let root = h.root().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h
        .engine
        .place_new_member_with_cancel(&root.sponsorship_code, 2001, &cancel)
        .await;
    assert_matches!(result, Err(PlacementError::Cancelled));
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.cache.len(root.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_cancelled_after_dequeue_releases_slot() {
    let store = Arc::new(MemoryNodeStore::new());
    let token = CancellationToken::new();
    let cache = Arc::new(CancellingCache {
        inner: MemoryPositionCache::new(),
        token: token.clone(),
    });
    let engine = PlacementEngine::new(store.clone(), cache.clone(), test_config());
    let root = engine.create_root(ROOT_USER).await.unwrap();
    let before = cache.inner.entries(root.id).await;

    let result = engine
        .place_new_member_with_cancel(&root.sponsorship_code, 2001, &token)
        .await;
    assert_matches!(result, Err(PlacementError::Cancelled));
    assert_eq!(store.len().await, 1);
    assert_eq!(cache.inner.entries(root.id).await, before);
}

#[tokio::test]
async fn test_request_dropped_mid_write_still_places_member() {
    let store = Arc::new(HookedStore::held());
    let cache = Arc::new(MemoryPositionCache::new());
    let engine = PlacementEngine::new(store.clone(), cache.clone(), test_config());
    let root = engine.create_root(ROOT_USER).await.unwrap();

    let request = tokio::spawn({
        let engine = engine.clone();
        let code = root.sponsorship_code.clone();
        async move { engine.place_new_member(&code, 2001).await }
    });
    store.write_started().await;
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    store.release_write();
    let placed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(node) = store.fetch_node_by_user(2001).await.unwrap() {
                if cache.len(root.id).await.unwrap() == 3 {
                    return node;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("placement and queue update should finish without the caller");

    assert_eq!(placed.parent_id, Some(root.id));
    assert_eq!(placed.position.side(), Some(Side::Left));

    let maintained = cache.entries(root.id).await;
    engine.rebuild_position_cache(root.id).await.unwrap();
    assert_eq!(cache.entries(root.id).await, maintained);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let store = Arc::new(HookedStore::always_occupied());
    let cache = Arc::new(MemoryPositionCache::new());
    let config = EngineConfig {
        max_attempts: 3,
        ..test_config()
    };
    let engine = PlacementEngine::new(store.clone(), cache, config);
    let root = engine.create_root(ROOT_USER).await.unwrap();

    let result = engine.place_new_member(&root.sponsorship_code, 2001).await;
    assert_matches!(
        result,
        Err(PlacementError::PlacementFailed { attempts: 3, .. })
    );
    assert_eq!(store.writes.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_scan_depth_limit_exhausts() {
    let config = EngineConfig {
        max_scan_depth: Some(0),
        ..test_config()
    };
    let h = Harness::with_config(config);
    let root = h.root().await;
    fill_sequentially(&h, &root.sponsorship_code, 2).await;
    h.cache.set_available(false);

    assert_matches!(
        h.engine.place_new_member(&root.sponsorship_code, 2001).await,
        Err(PlacementError::PlacementExhausted { sponsor_id }) if sponsor_id == root.id
    );
}

#[tokio::test]
async fn test_second_root_rejected() {
    let h = Harness::new();
    h.root().await;
    assert!(h.engine.create_root(ROOT_USER + 1).await.is_err());
    assert_eq!(occupied_slots(&h.store).await.len(), 0);
}
