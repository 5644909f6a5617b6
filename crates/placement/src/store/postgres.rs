//! [`NodeStore`] backed by the `network_nodes` table.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sponsornet_core::network::{NewNode, Node, Side};
use sponsornet_core::types::DbId;
use sponsornet_db::models::network_node::{CreateNetworkNode, CreateRootNode, NetworkNode};
use sponsornet_db::repositories::{NetworkNodeRepo, SlotWrite};
use sponsornet_db::{unique_violation, DbPool};

use crate::error::StoreError;
use crate::store::NodeStore;

/// Runs every repository call under a timeout and converts rows to domain
/// nodes.
#[derive(Clone)]
pub struct PgNodeStore {
    pool: DbPool,
    timeout: Duration,
}

impl PgNodeStore {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx::Error>> + Send,
    ) -> Result<T, StoreError> {
        self.bounded_write(fut, None).await
    }

    /// Like [`Self::bounded`], but maps unique-index violations onto their
    /// domain meaning using the values being written.
    async fn bounded_write<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx::Error>> + Send,
        write: Option<&Write<'_>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(match write {
                Some(write) => write.classify(err),
                None => StoreError::Database(err),
            }),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

/// Values of an insert, used to describe which uniqueness rule it broke.
struct Write<'a> {
    user_id: DbId,
    sponsorship_code: &'a str,
    slot: Option<(DbId, Side)>,
}

impl Write<'_> {
    fn classify(&self, err: sqlx::Error) -> StoreError {
        match (unique_violation(&err), self.slot) {
            (Some("uq_network_nodes_user_id"), _) => StoreError::DuplicateMember {
                user_id: self.user_id,
            },
            (Some("uq_network_nodes_sponsorship_code"), _) => {
                StoreError::DuplicateCode(self.sponsorship_code.to_string())
            }
            (Some("uq_network_nodes_single_root"), _) => StoreError::RootExists,
            (Some("uq_network_nodes_parent_position"), Some((parent_id, side))) => {
                StoreError::SlotOccupied { parent_id, side }
            }
            _ => StoreError::Database(err),
        }
    }
}

fn one(row: Option<NetworkNode>) -> Result<Option<Node>, StoreError> {
    row.map(NetworkNode::into_domain).transpose().map_err(Into::into)
}

fn many(rows: Vec<NetworkNode>) -> Result<Vec<Node>, StoreError> {
    rows.into_iter()
        .map(|row| row.into_domain().map_err(Into::into))
        .collect()
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn fetch_node(&self, id: DbId) -> Result<Option<Node>, StoreError> {
        one(self.bounded(NetworkNodeRepo::find_by_id(&self.pool, id)).await?)
    }

    async fn fetch_node_by_user(&self, user_id: DbId) -> Result<Option<Node>, StoreError> {
        one(self
            .bounded(NetworkNodeRepo::find_by_user_id(&self.pool, user_id))
            .await?)
    }

    async fn fetch_node_by_code(&self, code: &str) -> Result<Option<Node>, StoreError> {
        one(self
            .bounded(NetworkNodeRepo::find_by_code(&self.pool, code))
            .await?)
    }

    async fn fetch_root(&self) -> Result<Option<Node>, StoreError> {
        one(self.bounded(NetworkNodeRepo::find_root(&self.pool)).await?)
    }

    async fn fetch_nodes(&self, ids: &[DbId]) -> Result<Vec<Node>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        many(self.bounded(NetworkNodeRepo::find_by_ids(&self.pool, ids)).await?)
    }

    async fn fetch_children(&self, id: DbId) -> Result<Vec<Node>, StoreError> {
        many(self
            .bounded(NetworkNodeRepo::find_children(&self.pool, id))
            .await?)
    }

    async fn fetch_ancestors(&self, id: DbId) -> Result<Vec<Node>, StoreError> {
        many(self
            .bounded(NetworkNodeRepo::find_ancestors(&self.pool, id))
            .await?)
    }

    async fn fetch_subtree(
        &self,
        root_id: DbId,
        max_depth: Option<u32>,
    ) -> Result<Vec<Node>, StoreError> {
        let depth = max_depth.map(|d| i32::try_from(d).unwrap_or(i32::MAX));
        let rows = self
            .bounded(NetworkNodeRepo::find_subtree(&self.pool, root_id, depth))
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(root_id));
        }
        many(rows)
    }

    async fn create_root(&self, user_id: DbId, sponsorship_code: &str) -> Result<Node, StoreError> {
        let input = CreateRootNode {
            user_id,
            sponsorship_code: sponsorship_code.to_string(),
        };
        let write = Write {
            user_id,
            sponsorship_code,
            slot: None,
        };
        let row = self
            .bounded_write(NetworkNodeRepo::create_root(&self.pool, &input), Some(&write))
            .await?;
        Ok(row.into_domain()?)
    }

    async fn create_node_at_slot(&self, input: &NewNode) -> Result<Node, StoreError> {
        let dto = CreateNetworkNode {
            parent_id: input.parent_id,
            side: input.side,
            user_id: input.user_id,
            sponsor_id: input.sponsor_id,
            sponsorship_code: input.sponsorship_code.clone(),
        };
        let write = Write {
            user_id: input.user_id,
            sponsorship_code: &input.sponsorship_code,
            slot: Some((input.parent_id, input.side)),
        };
        let outcome = self
            .bounded_write(NetworkNodeRepo::create_at_slot(&self.pool, &dto), Some(&write))
            .await?;

        match outcome {
            SlotWrite::Created(row) => Ok(row.into_domain()?),
            SlotWrite::Occupied => Err(StoreError::SlotOccupied {
                parent_id: input.parent_id,
                side: input.side,
            }),
            SlotWrite::ParentMissing => Err(StoreError::NotFound(input.parent_id)),
        }
    }
}
