#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sponsornet_core::network::{AvailablePosition, NewNode, Node};
use sponsornet_core::types::DbId;
use sponsornet_placement::cache::{CacheLookup, MemoryPositionCache, PositionCache};
use sponsornet_placement::store::{MemoryNodeStore, NodeStore};
use sponsornet_placement::{CacheError, EngineConfig, PlacementEngine, StoreError};
use tokio::sync::{Barrier, Notify};
use tokio_util::sync::CancellationToken;

/// First user id handed to placed members; the root is `ROOT_USER`.
pub const ROOT_USER: DbId = 1000;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_attempts: 5,
        ..EngineConfig::default()
    }
}

/// Engine over fresh in-memory store and cache.
pub struct Harness {
    pub store: Arc<MemoryNodeStore>,
    pub cache: Arc<MemoryPositionCache>,
    pub engine: PlacementEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryNodeStore::new());
        let cache = Arc::new(MemoryPositionCache::new());
        let engine = PlacementEngine::new(store.clone(), cache.clone(), config);
        Self {
            store,
            cache,
            engine,
        }
    }

    /// Create the network root and return it.
    pub async fn root(&self) -> Node {
        self.engine.create_root(ROOT_USER).await.unwrap()
    }
}

/// `(parent_id, side)` pairs of every non-root node, sorted.
pub async fn occupied_slots(store: &MemoryNodeStore) -> Vec<(DbId, String)> {
    let mut slots: Vec<_> = store
        .all_nodes()
        .await
        .into_iter()
        .filter_map(|n| Some((n.parent_id?, n.position.as_str().to_string())))
        .collect();
    slots.sort();
    slots
}

// ---------------------------------------------------------------------------
// Store with a hook on the slot write
// ---------------------------------------------------------------------------

pub enum WriteHook {
    /// The first `remaining` writes wait for each other at `barrier`, so
    /// they read the tree before any of them commits.
    Race {
        barrier: Barrier,
        remaining: AtomicUsize,
    },
    /// Every write finds its slot taken.
    AlwaysOccupied,
    /// Every write waits at `release` after signalling `entered`.
    Held { entered: Notify, release: Notify },
}

pub struct HookedStore {
    pub inner: MemoryNodeStore,
    hook: WriteHook,
    pub writes: AtomicUsize,
}

impl HookedStore {
    pub fn racing(writers: usize) -> Self {
        Self::new(WriteHook::Race {
            barrier: Barrier::new(writers),
            remaining: AtomicUsize::new(writers),
        })
    }

    pub fn always_occupied() -> Self {
        Self::new(WriteHook::AlwaysOccupied)
    }

    pub fn held() -> Self {
        Self::new(WriteHook::Held {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Wait until a write has reached the store.
    pub async fn write_started(&self) {
        if let WriteHook::Held { entered, .. } = &self.hook {
            entered.notified().await;
        }
    }

    /// Let one held write through.
    pub fn release_write(&self) {
        if let WriteHook::Held { release, .. } = &self.hook {
            release.notify_one();
        }
    }

    fn new(hook: WriteHook) -> Self {
        Self {
            inner: MemoryNodeStore::new(),
            hook,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeStore for HookedStore {
    async fn fetch_node(&self, id: DbId) -> Result<Option<Node>, StoreError> {
        self.inner.fetch_node(id).await
    }

    async fn fetch_node_by_user(&self, user_id: DbId) -> Result<Option<Node>, StoreError> {
        self.inner.fetch_node_by_user(user_id).await
    }

    async fn fetch_node_by_code(&self, code: &str) -> Result<Option<Node>, StoreError> {
        self.inner.fetch_node_by_code(code).await
    }

    async fn fetch_root(&self) -> Result<Option<Node>, StoreError> {
        self.inner.fetch_root().await
    }

    async fn fetch_nodes(&self, ids: &[DbId]) -> Result<Vec<Node>, StoreError> {
        self.inner.fetch_nodes(ids).await
    }

    async fn fetch_children(&self, id: DbId) -> Result<Vec<Node>, StoreError> {
        self.inner.fetch_children(id).await
    }

    async fn fetch_ancestors(&self, id: DbId) -> Result<Vec<Node>, StoreError> {
        self.inner.fetch_ancestors(id).await
    }

    async fn fetch_subtree(
        &self,
        root_id: DbId,
        max_depth: Option<u32>,
    ) -> Result<Vec<Node>, StoreError> {
        self.inner.fetch_subtree(root_id, max_depth).await
    }

    async fn create_root(&self, user_id: DbId, sponsorship_code: &str) -> Result<Node, StoreError> {
        self.inner.create_root(user_id, sponsorship_code).await
    }

    async fn create_node_at_slot(&self, input: &NewNode) -> Result<Node, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match &self.hook {
            WriteHook::Race { barrier, remaining } => {
                let gated = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if gated {
                    barrier.wait().await;
                }
                self.inner.create_node_at_slot(input).await
            }
            WriteHook::AlwaysOccupied => Err(StoreError::SlotOccupied {
                parent_id: input.parent_id,
                side: input.side,
            }),
            WriteHook::Held { entered, release } => {
                entered.notify_one();
                release.notified().await;
                self.inner.create_node_at_slot(input).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cache that fires a cancellation token when a slot is handed out
// ---------------------------------------------------------------------------

pub struct CancellingCache {
    pub inner: MemoryPositionCache,
    pub token: CancellationToken,
}

#[async_trait]
impl PositionCache for CancellingCache {
    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn enqueue(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        self.inner.enqueue(root_id, slots).await
    }

    async fn dequeue(&self, root_id: DbId) -> CacheLookup {
        let lookup = self.inner.dequeue(root_id).await;
        self.token.cancel();
        lookup
    }

    async fn remove(&self, root_id: DbId, slot: &AvailablePosition) -> Result<bool, CacheError> {
        self.inner.remove(root_id, slot).await
    }

    async fn len(&self, root_id: DbId) -> Result<usize, CacheError> {
        self.inner.len(root_id).await
    }

    async fn replace(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        self.inner.replace(root_id, slots).await
    }

    async fn clear(&self, root_id: DbId) -> Result<(), CacheError> {
        self.inner.clear(root_id).await
    }
}

// ---------------------------------------------------------------------------
// Cache whose dequeues fail on demand
// ---------------------------------------------------------------------------

/// Reachable cache that reports the next `failing` dequeues as unavailable,
/// the way a single Redis timeout does.
#[derive(Default)]
pub struct FlakyCache {
    pub inner: MemoryPositionCache,
    failing: AtomicUsize,
}

impl FlakyCache {
    pub fn fail_next_dequeues(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionCache for FlakyCache {
    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn enqueue(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        self.inner.enqueue(root_id, slots).await
    }

    async fn dequeue(&self, root_id: DbId) -> CacheLookup {
        let failed = self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return CacheLookup::Unavailable;
        }
        self.inner.dequeue(root_id).await
    }

    async fn remove(&self, root_id: DbId, slot: &AvailablePosition) -> Result<bool, CacheError> {
        self.inner.remove(root_id, slot).await
    }

    async fn len(&self, root_id: DbId) -> Result<usize, CacheError> {
        self.inner.len(root_id).await
    }

    async fn replace(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        self.inner.replace(root_id, slots).await
    }

    async fn clear(&self, root_id: DbId) -> Result<(), CacheError> {
        self.inner.clear(root_id).await
    }
}
