//! Process-local position queues.
//!
//! Used when no Redis URL is configured and by the engine tests, which flip
//! [`MemoryPositionCache::set_available`] to simulate an outage.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sponsornet_core::network::AvailablePosition;
use sponsornet_core::types::DbId;
use tokio::sync::Mutex;

use crate::cache::{CacheLookup, PositionCache};
use crate::error::CacheError;

pub struct MemoryPositionCache {
    queues: Mutex<HashMap<DbId, BTreeSet<AvailablePosition>>>,
    available: AtomicBool,
}

impl Default for MemoryPositionCache {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryPositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue contents of `root_id`, head first.
    pub async fn entries(&self, root_id: DbId) -> Vec<AvailablePosition> {
        self.queues
            .lock()
            .await
            .get(&root_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }
}

#[async_trait]
impl PositionCache for MemoryPositionCache {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn enqueue(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        self.check()?;
        let mut queues = self.queues.lock().await;
        queues
            .entry(root_id)
            .or_default()
            .extend(slots.iter().map(|slot| slot.for_root(root_id)));
        Ok(())
    }

    async fn dequeue(&self, root_id: DbId) -> CacheLookup {
        if self.check().is_err() {
            return CacheLookup::Unavailable;
        }
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(&root_id) else {
            return CacheLookup::Miss;
        };
        let head = queue.pop_first();
        if queue.is_empty() {
            queues.remove(&root_id);
        }
        head.map_or(CacheLookup::Miss, CacheLookup::Hit)
    }

    async fn remove(&self, root_id: DbId, slot: &AvailablePosition) -> Result<bool, CacheError> {
        self.check()?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(&root_id) else {
            return Ok(false);
        };
        let removed = queue.remove(&slot.for_root(root_id));
        if queue.is_empty() {
            queues.remove(&root_id);
        }
        Ok(removed)
    }

    async fn len(&self, root_id: DbId) -> Result<usize, CacheError> {
        self.check()?;
        Ok(self
            .queues
            .lock()
            .await
            .get(&root_id)
            .map_or(0, BTreeSet::len))
    }

    async fn replace(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        self.check()?;
        let queue: BTreeSet<_> = slots.iter().map(|slot| slot.for_root(root_id)).collect();
        let mut queues = self.queues.lock().await;
        if queue.is_empty() {
            queues.remove(&root_id);
        } else {
            queues.insert(root_id, queue);
        }
        Ok(())
    }

    async fn clear(&self, root_id: DbId) -> Result<(), CacheError> {
        self.check()?;
        self.queues.lock().await.remove(&root_id);
        Ok(())
    }
}
