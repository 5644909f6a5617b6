//! Chooses the parent and side for a new member and writes the node.
//!
//! The first attempt asks the sponsor's position queue for its head slot.
//! If the queue is unbuilt or unreachable, and on every retry, the planner
//! scans the sponsor's subtree breadth-first, one store round trip per
//! level. Both paths pick the same slot because queue order and scan order
//! are the same order.
//!
//! The write is conditional on the slot still being empty, so a stale queue
//! entry or a racing registration costs a retry, never a double placement.
//! A queue that may be missing slots is never trusted: it reads as a miss
//! until it has been rebuilt.

use std::sync::Arc;

use serde::Serialize;
use sponsornet_core::network::{AvailablePosition, Frontier, NewNode, Node, Side, TreePath};
use sponsornet_core::sponsorship::{generate_code, validate_code};
use sponsornet_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheLookup, PositionCache};
use crate::config::EngineConfig;
use crate::error::{PlacementError, StoreError};
use crate::maintainer::{CacheMaintainer, RootQueue};
use crate::store::NodeStore;

/// Where the slot of a placement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSource {
    Cache,
    Scan,
    /// The member was already placed by an earlier request; nothing was
    /// written.
    Existing,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacementResult {
    pub node: Node,
    pub parent_node_id: DbId,
    pub side: Side,
    pub level: i32,
    pub source: SlotSource,
}

impl PlacementResult {
    fn existing(node: Node) -> Result<Self, PlacementError> {
        let (Some(parent_node_id), Some(side)) = (node.parent_id, node.position.side()) else {
            return Err(PlacementError::PlacementFailed {
                attempts: 0,
                reason: format!("user {} is the network root", node.user_id),
            });
        };
        Ok(Self {
            parent_node_id,
            side,
            level: node.level,
            source: SlotSource::Existing,
            node,
        })
    }
}

#[derive(Clone)]
pub struct Planner {
    store: Arc<dyn NodeStore>,
    cache: Arc<dyn PositionCache>,
    maintainer: CacheMaintainer,
    config: Arc<EngineConfig>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn NodeStore>,
        cache: Arc<dyn PositionCache>,
        maintainer: CacheMaintainer,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            maintainer,
            config,
        }
    }

    /// Place `user_id` under the member whose sponsorship code is
    /// `sponsor_code`.
    ///
    /// `cancel` is honoured up to the write. Once the write has been issued
    /// the placement and its cache maintenance run to completion even if
    /// this future is dropped.
    pub async fn place(
        &self,
        sponsor_code: &str,
        user_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<PlacementResult, PlacementError> {
        let sponsor = self.resolve_sponsor(sponsor_code).await?;
        let max_attempts = self.config.max_attempts.max(1);

        let mut sponsor_path: Option<TreePath> = None;
        let mut rebuild_root = false;
        let mut new_code = generate_code();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(PlacementError::Cancelled);
            }

            let lookup = if attempt == 1 {
                self.lookup(sponsor.id).await
            } else {
                CacheLookup::Unavailable
            };
            let (slot, source) = match lookup {
                CacheLookup::Hit(slot) => {
                    tracing::debug!(sponsor_id = sponsor.id, path = %slot.path, "Position cache hit");
                    (slot, SlotSource::Cache)
                }
                other => {
                    if other == CacheLookup::Miss {
                        tracing::debug!(sponsor_id = sponsor.id, "Position cache miss");
                        rebuild_root = true;
                    }
                    let path = match &sponsor_path {
                        Some(path) => path.clone(),
                        None => {
                            let path = self.path_of(&sponsor).await?;
                            sponsor_path = Some(path.clone());
                            path
                        }
                    };
                    (self.fallback_scan(sponsor.id, path).await?, SlotSource::Scan)
                }
            };

            if cancel.is_cancelled() {
                if source == SlotSource::Cache {
                    self.maintainer.release_slot(&slot).await;
                }
                return Err(PlacementError::Cancelled);
            }

            let root_queue = if rebuild_root {
                RootQueue::Rebuild
            } else if source == SlotSource::Cache {
                RootQueue::Popped
            } else {
                RootQueue::Unknown
            };

            let input = NewNode {
                parent_id: slot.parent_node_id,
                side: slot.side,
                user_id,
                sponsor_id: sponsor.id,
                sponsorship_code: new_code.clone(),
            };

            match self.write(input, slot.clone(), source, root_queue).await? {
                Ok(node) => {
                    tracing::info!(
                        sponsor_id = sponsor.id,
                        node_id = node.id,
                        parent_node_id = slot.parent_node_id,
                        side = %slot.side,
                        level = node.level,
                        attempt,
                        source = ?source,
                        "Member placed"
                    );
                    return Ok(PlacementResult {
                        parent_node_id: slot.parent_node_id,
                        side: slot.side,
                        level: node.level,
                        source,
                        node,
                    });
                }
                Err(StoreError::SlotOccupied { parent_id, side }) => {
                    tracing::warn!(
                        sponsor_id = sponsor.id,
                        parent_node_id = parent_id,
                        side = %side,
                        attempt,
                        source = ?source,
                        "Slot taken by a concurrent placement, rescanning"
                    );
                    last_error = format!("slot {side} of node {parent_id} was taken");
                }
                Err(StoreError::DuplicateMember { .. }) => {
                    match self.store.fetch_node_by_user(user_id).await? {
                        Some(node) => {
                            tracing::info!(user_id, node_id = node.id, "Member already placed");
                            return PlacementResult::existing(node);
                        }
                        None => last_error = format!("user {user_id} vanished mid-placement"),
                    }
                }
                Err(StoreError::DuplicateCode(code)) => {
                    tracing::warn!(attempt, "Generated sponsorship code collided, regenerating");
                    last_error = format!("sponsorship code '{code}' collided");
                    new_code = generate_code();
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(sponsor_id = sponsor.id, attempt, error = %e, "Transient store error");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PlacementError::PlacementFailed {
            attempts: max_attempts,
            reason: last_error,
        })
    }

    async fn resolve_sponsor(&self, sponsor_code: &str) -> Result<Node, PlacementError> {
        let not_found = || PlacementError::SponsorNotFound(sponsor_code.trim().to_string());
        let code = validate_code(sponsor_code).map_err(|_| not_found())?;
        self.store
            .fetch_node_by_code(&code)
            .await?
            .filter(|node| node.is_active)
            .ok_or_else(not_found)
    }

    async fn path_of(&self, node: &Node) -> Result<TreePath, PlacementError> {
        let ancestors = self.store.fetch_ancestors(node.id).await?;
        Ok(TreePath::from_lineage(node, &ancestors)?)
    }

    /// Pop the sponsor's queue head. A slow or failing cache reads as
    /// unavailable, a stale queue as a miss.
    ///
    /// A dequeue that failed may still have popped the head on the server,
    /// so the queue is marked stale and rebuilt on its next use.
    async fn lookup(&self, sponsor_id: DbId) -> CacheLookup {
        if !self.cache.is_available().await {
            return CacheLookup::Unavailable;
        }
        if self.maintainer.is_stale(sponsor_id).await {
            tracing::debug!(sponsor_id, "Position queue is stale");
            return CacheLookup::Miss;
        }
        let lookup =
            match tokio::time::timeout(self.config.cache_timeout, self.cache.dequeue(sponsor_id))
                .await
            {
                Ok(lookup) => lookup,
                Err(_) => {
                    tracing::warn!(sponsor_id, "Position cache timed out, falling back to scan");
                    CacheLookup::Unavailable
                }
            };
        if lookup == CacheLookup::Unavailable {
            self.maintainer.mark_stale(&[sponsor_id]).await;
        }
        lookup
    }

    /// First empty slot under the sponsor in breadth-first, left-first
    /// order, read straight from the store.
    pub async fn fallback_scan(
        &self,
        sponsor_id: DbId,
        sponsor_path: TreePath,
    ) -> Result<AvailablePosition, PlacementError> {
        let sponsor = self
            .store
            .fetch_node(sponsor_id)
            .await?
            .ok_or(PlacementError::Store(StoreError::NotFound(sponsor_id)))?;
        let exhausted = PlacementError::PlacementExhausted { sponsor_id };

        let mut frontier = Frontier::start(sponsor, sponsor_path);
        let mut depth = 0u32;
        loop {
            if let Some(slot) = frontier.first_open_slot() {
                return Ok(slot);
            }
            if self.config.max_scan_depth.is_some_and(|max| depth >= max) {
                return Err(exhausted);
            }
            let ids = frontier.child_ids();
            if ids.is_empty() {
                return Err(exhausted);
            }
            let children = self.store.fetch_nodes(&ids).await?;
            frontier = frontier.advance(children)?;
            depth += 1;
        }
    }

    /// Issue the conditional write and the follow-up maintenance on a
    /// separate task.
    ///
    /// The outer `Result` is the task itself; the inner one is the store's
    /// verdict. A cache-sourced slot that was not consumed is handed back,
    /// except when it turned out to be occupied.
    async fn write(
        &self,
        input: NewNode,
        slot: AvailablePosition,
        source: SlotSource,
        root_queue: RootQueue,
    ) -> Result<Result<Node, StoreError>, PlacementError> {
        let store = Arc::clone(&self.store);
        let maintainer = self.maintainer.clone();

        let task = tokio::spawn(async move {
            match store.create_node_at_slot(&input).await {
                Ok(node) => {
                    maintainer.on_node_placed(&slot, &node, root_queue).await;
                    Ok(node)
                }
                Err(e) => {
                    if source == SlotSource::Cache && !matches!(e, StoreError::SlotOccupied { .. }) {
                        maintainer.release_slot(&slot).await;
                    }
                    Err(e)
                }
            }
        });

        task.await
            .map_err(|e| PlacementError::Internal(format!("Placement task failed: {e}")))
    }
}
