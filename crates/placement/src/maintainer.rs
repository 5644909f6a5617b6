//! Keeps position queues and statistics in step with the tree.
//!
//! After a placement the new node's slot is gone and its two empty child
//! slots are new. Every sponsor queue that covers the new node must see both
//! changes. The sponsors whose subtree contains the node are exactly its
//! ancestors, so the maintainer walks the ancestor line and patches every
//! queue that has been built. Unbuilt queues are left alone; they are built
//! in full the first time someone places under that sponsor.
//!
//! Cache failures are logged and never returned. A queue that missed an
//! update is marked stale in the queue ledger; the planner treats a stale
//! queue as unbuilt, so its next placement scans and rebuilds it.
//!
//! A rebuild reads the subtree, then swaps the new queue in. Patches that
//! land in between are logged against the rebuild and replayed onto the
//! swapped-in queue before it is considered current.

use std::collections::HashMap;
use std::sync::Arc;

use sponsornet_core::network::{AvailablePosition, Node, SubtreeSnapshot, TreePath};
use sponsornet_core::types::DbId;
use tokio::sync::Mutex;

use crate::cache::{PositionCache, StatisticsCache};
use crate::error::{CacheError, RebuildError};
use crate::store::NodeStore;

/// What the planner knows about the placement root's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootQueue {
    /// The filled slot was popped from it, so it is built.
    Popped,
    /// It read as unbuilt or stale and is rebuilt from the store.
    Rebuild,
    /// It was not consulted or could not be reached. Patched only if built.
    Unknown,
}

/// One queue update: `filled` leaves the queue, `opened` joins it.
#[derive(Debug, Clone)]
struct QueuePatch {
    filled: AvailablePosition,
    opened: Vec<AvailablePosition>,
}

// ---------------------------------------------------------------------------
// Queue ledger
// ---------------------------------------------------------------------------

/// Process-local bookkeeping of which queues can be trusted.
///
/// Every mark and every rebuild takes a ticket from one counter. A rebuild
/// covers the marks with a smaller ticket: anything marked before the
/// rebuild read the subtree is in the snapshot.
#[derive(Default)]
struct QueueLedger {
    ticket: u64,
    /// Queue root to the ticket of its latest stale mark.
    stale: HashMap<DbId, u64>,
    /// Ticket of the latest "every queue is stale" mark, `0` if none.
    all_stale_at: u64,
    /// Queue root to the ticket of its latest completed rebuild.
    rebuilt_at: HashMap<DbId, u64>,
    /// Rebuilds in progress per queue root, each with the patches made
    /// since it started.
    windows: HashMap<DbId, HashMap<u64, Vec<QueuePatch>>>,
}

impl QueueLedger {
    fn next_ticket(&mut self) -> u64 {
        self.ticket += 1;
        self.ticket
    }

    fn is_stale(&self, root_id: DbId) -> bool {
        if self.stale.contains_key(&root_id) {
            return true;
        }
        self.all_stale_at > 0
            && self
                .rebuilt_at
                .get(&root_id)
                .map_or(true, |&at| at < self.all_stale_at)
    }

    fn mark_stale(&mut self, root_ids: &[DbId]) {
        let ticket = self.next_ticket();
        for &root_id in root_ids {
            self.stale.insert(root_id, ticket);
        }
    }

    fn mark_all_stale(&mut self) {
        self.all_stale_at = self.next_ticket();
    }

    fn open_window(&mut self, root_id: DbId) -> u64 {
        let ticket = self.next_ticket();
        self.windows.entry(root_id).or_default().insert(ticket, Vec::new());
        ticket
    }

    fn record(&mut self, root_id: DbId, patch: &QueuePatch) {
        if let Some(windows) = self.windows.get_mut(&root_id) {
            for log in windows.values_mut() {
                log.push(patch.clone());
            }
        }
    }

    /// Take the patches logged against rebuild `ticket`. When there are
    /// none left the rebuild is complete: the window closes and the marks
    /// it covers are cleared.
    fn drain_window(&mut self, root_id: DbId, ticket: u64) -> Vec<QueuePatch> {
        let Some(windows) = self.windows.get_mut(&root_id) else {
            return Vec::new();
        };
        if let Some(log) = windows.get_mut(&ticket) {
            if !log.is_empty() {
                return std::mem::take(log);
            }
        }
        windows.remove(&ticket);
        if windows.is_empty() {
            self.windows.remove(&root_id);
        }

        if self.stale.get(&root_id).is_some_and(|&marked| marked < ticket) {
            self.stale.remove(&root_id);
        }
        let at = self.rebuilt_at.entry(root_id).or_default();
        *at = (*at).max(ticket);
        Vec::new()
    }

    fn abandon_window(&mut self, root_id: DbId, ticket: u64) {
        if let Some(windows) = self.windows.get_mut(&root_id) {
            windows.remove(&ticket);
            if windows.is_empty() {
                self.windows.remove(&root_id);
            }
        }
        self.mark_stale(&[root_id]);
    }
}

// ---------------------------------------------------------------------------
// Maintainer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CacheMaintainer {
    store: Arc<dyn NodeStore>,
    cache: Arc<dyn PositionCache>,
    stats: Arc<StatisticsCache>,
    ledger: Arc<Mutex<QueueLedger>>,
}

impl CacheMaintainer {
    pub fn new(
        store: Arc<dyn NodeStore>,
        cache: Arc<dyn PositionCache>,
        stats: Arc<StatisticsCache>,
    ) -> Self {
        Self {
            store,
            cache,
            stats,
            ledger: Arc::new(Mutex::new(QueueLedger::default())),
        }
    }

    /// Whether the queue of `root_id` may be missing slots and must be
    /// rebuilt before it is dequeued from.
    pub async fn is_stale(&self, root_id: DbId) -> bool {
        self.ledger.lock().await.is_stale(root_id)
    }

    /// Flag queues whose contents can no longer be trusted.
    pub async fn mark_stale(&self, root_ids: &[DbId]) {
        self.ledger.lock().await.mark_stale(root_ids);
    }

    /// Record that `node` now occupies `filled`.
    ///
    /// `filled.root_sponsor_id` is the sponsor the placement was made under;
    /// `root_queue` says how that sponsor's queue is brought up to date.
    pub async fn on_node_placed(&self, filled: &AvailablePosition, node: &Node, root_queue: RootQueue) {
        let root_id = filled.root_sponsor_id;

        let ancestors = match self.store.fetch_ancestors(node.id).await {
            Ok(ancestors) => ancestors,
            Err(e) => {
                // Without the sponsor line we cannot tell whose statistics
                // changed or which other queues cover the node.
                tracing::warn!(node_id = node.id, error = %e, "Failed to load ancestors after placement");
                self.stats.clear().await;
                self.ledger.lock().await.mark_all_stale();
                self.update_queue(root_id, filled, node, root_queue).await;
                return;
            }
        };

        let user_ids: Vec<DbId> = ancestors.iter().map(|a| a.user_id).collect();
        self.stats.invalidate(&user_ids).await;

        if !self.cache.is_available().await {
            let mut line: Vec<DbId> = ancestors.iter().map(|a| a.id).collect();
            line.push(root_id);
            self.mark_stale(&line).await;
            tracing::debug!(
                node_id = node.id,
                queues = line.len(),
                "Position cache unavailable, queues on the sponsor line marked stale"
            );
            return;
        }

        self.update_queue(root_id, filled, node, root_queue).await;

        for ancestor in ancestors.iter().filter(|a| a.id != root_id) {
            self.update_queue(ancestor.id, filled, node, RootQueue::Unknown)
                .await;
        }
    }

    async fn update_queue(
        &self,
        queue_root: DbId,
        filled: &AvailablePosition,
        node: &Node,
        how: RootQueue,
    ) {
        if how == RootQueue::Rebuild {
            if let Err(e) = self.rebuild(queue_root).await {
                tracing::warn!(root_id = queue_root, error = %e, "Position queue rebuild failed");
                self.discard(queue_root).await;
            }
            return;
        }

        if let Err(e) = self
            .patch(queue_root, filled, node, how == RootQueue::Popped)
            .await
        {
            tracing::warn!(
                root_id = queue_root,
                parent_node_id = filled.parent_node_id,
                side = %filled.side,
                error = %e,
                "Position queue update failed"
            );
            self.mark_stale(&[queue_root]).await;
            self.discard(queue_root).await;
        }
    }

    /// Swap `filled` for the new node's open slots in one queue.
    ///
    /// A queue the slot was popped from is patched unconditionally. Any
    /// other queue is patched only once built; an empty queue reads as
    /// unbuilt. Rebuilds in progress get the patch either way.
    async fn patch(
        &self,
        queue_root: DbId,
        filled: &AvailablePosition,
        node: &Node,
        popped: bool,
    ) -> Result<(), CacheError> {
        let patch = QueuePatch {
            filled: filled.for_root(queue_root),
            opened: AvailablePosition::open_slots_of(queue_root, node, &filled.path),
        };
        self.ledger.lock().await.record(queue_root, &patch);

        if !popped && self.cache.len(queue_root).await? == 0 {
            return Ok(());
        }
        self.apply(queue_root, &patch).await
    }

    async fn apply(&self, queue_root: DbId, patch: &QueuePatch) -> Result<(), CacheError> {
        self.cache.remove(queue_root, &patch.filled).await?;
        self.cache.enqueue(queue_root, &patch.opened).await
    }

    async fn discard(&self, queue_root: DbId) {
        if let Err(e) = self.cache.clear(queue_root).await {
            tracing::warn!(root_id = queue_root, error = %e, "Failed to discard position queue");
        }
    }

    /// Rebuild the queue of `root_id` from a full scan of its subtree.
    /// Returns the number of slots in the snapshot.
    ///
    /// The old queue keeps serving until the new one is swapped in.
    /// Placements that commit after the subtree read are replayed onto the
    /// new queue from the ledger. A failed rebuild leaves the queue stale.
    pub async fn rebuild(&self, root_id: DbId) -> Result<usize, RebuildError> {
        let ticket = self.ledger.lock().await.open_window(root_id);
        let result = self.rebuild_in_window(root_id, ticket).await;
        if result.is_err() {
            self.ledger.lock().await.abandon_window(root_id, ticket);
        }
        result
    }

    async fn rebuild_in_window(&self, root_id: DbId, ticket: u64) -> Result<usize, RebuildError> {
        let root = self
            .store
            .fetch_node(root_id)
            .await?
            .ok_or(RebuildError::NotFound(root_id))?;
        let ancestors = self.store.fetch_ancestors(root_id).await?;
        let root_path = TreePath::from_lineage(&root, &ancestors)?;

        let nodes = self.store.fetch_subtree(root_id, None).await?;
        let root = nodes
            .iter()
            .find(|n| n.id == root_id)
            .cloned()
            .unwrap_or(root);
        let snapshot = SubtreeSnapshot::build(root, nodes, None)?;
        let slots = snapshot.open_slots(root_id, &root_path);

        self.cache.replace(root_id, &slots).await?;

        let mut replayed = 0;
        loop {
            let pending = self.ledger.lock().await.drain_window(root_id, ticket);
            if pending.is_empty() {
                break;
            }
            for patch in &pending {
                self.apply(root_id, patch).await?;
            }
            replayed += pending.len();
        }

        tracing::debug!(root_id, slots = slots.len(), replayed, "Rebuilt position queue");
        Ok(slots.len())
    }

    /// Put back a slot the planner dequeued but did not fill.
    ///
    /// If the slot was filled by someone else in the meantime the stale
    /// entry is harmless: the conditional write rejects it and the planner
    /// scans instead.
    pub async fn release_slot(&self, slot: &AvailablePosition) {
        if let Err(e) = self
            .cache
            .enqueue(slot.root_sponsor_id, std::slice::from_ref(slot))
            .await
        {
            tracing::warn!(
                root_id = slot.root_sponsor_id,
                parent_node_id = slot.parent_node_id,
                error = %e,
                "Failed to release position slot"
            );
            self.mark_stale(&[slot.root_sponsor_id]).await;
            self.discard(slot.root_sponsor_id).await;
        }
    }

    /// Build the queues of `root_ids` that are unbuilt or stale, or all of
    /// them with `force`. Returns how many queues were rebuilt.
    pub async fn warm(&self, root_ids: &[DbId], force: bool) -> usize {
        let mut rebuilt = 0;
        for &root_id in root_ids {
            if !force && !self.is_stale(root_id).await {
                match self.cache.len(root_id).await {
                    Ok(0) => {}
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(root_id, error = %e, "Skipping warm-up, cache unreachable");
                        continue;
                    }
                }
            }
            match self.rebuild(root_id).await {
                Ok(_) => rebuilt += 1,
                Err(e) => tracing::warn!(root_id, error = %e, "Position queue warm-up failed"),
            }
        }
        rebuilt
    }
}
