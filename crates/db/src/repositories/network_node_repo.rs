//! Repository for the `network_nodes` table.

use sponsornet_core::network::Side;
use sponsornet_core::types::DbId;
use sqlx::PgPool;

use crate::models::network_node::{CreateNetworkNode, CreateRootNode, NetworkNode};

/// Column list for network_nodes queries.
const COLUMNS: &str = "id, user_id, sponsor_id, parent_id, left_child_id, right_child_id, \
                       level, position, sponsorship_code, is_active, created_at, updated_at";

/// Outcome of a conditional slot write.
#[derive(Debug)]
pub enum SlotWrite {
    /// The member was inserted and linked under its parent.
    Created(NetworkNode),
    /// Another writer filled the slot first; nothing was written.
    Occupied,
    /// The parent row does not exist; nothing was written.
    ParentMissing,
}

/// Provides data access for network tree nodes.
pub struct NetworkNodeRepo;

impl NetworkNodeRepo {
    /// Find a node by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<NetworkNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM network_nodes WHERE id = $1");
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the node owned by a user.
    pub async fn find_by_user_id(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<NetworkNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM network_nodes WHERE user_id = $1");
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Find a node by its (already normalised) sponsorship code.
    pub async fn find_by_code(
        pool: &PgPool,
        code: &str,
    ) -> Result<Option<NetworkNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM network_nodes WHERE sponsorship_code = $1");
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(code)
            .fetch_optional(pool)
            .await
    }

    /// Find the network root, if the tree has been bootstrapped.
    pub async fn find_root(pool: &PgPool) -> Result<Option<NetworkNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM network_nodes WHERE position = 'root'");
        sqlx::query_as::<_, NetworkNode>(&query)
            .fetch_optional(pool)
            .await
    }

    /// Find several nodes at once. Order of the result is unspecified.
    pub async fn find_by_ids(pool: &PgPool, ids: &[DbId]) -> Result<Vec<NetworkNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM network_nodes WHERE id = ANY($1)");
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// Direct children of a node, left first.
    pub async fn find_children(
        pool: &PgPool,
        parent_id: DbId,
    ) -> Result<Vec<NetworkNode>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM network_nodes \
             WHERE parent_id = $1 \
             ORDER BY position ASC"
        );
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(parent_id)
            .fetch_all(pool)
            .await
    }

    /// Every ancestor of a node, nearest first, ending at the root.
    pub async fn find_ancestors(pool: &PgPool, id: DbId) -> Result<Vec<NetworkNode>, sqlx::Error> {
        let query = format!(
            "WITH RECURSIVE lineage AS ( \
                 SELECT n.*, 0 AS hops FROM network_nodes n \
                 WHERE n.id = (SELECT parent_id FROM network_nodes WHERE id = $1) \
                 UNION ALL \
                 SELECT p.*, l.hops + 1 FROM network_nodes p \
                 JOIN lineage l ON p.id = l.parent_id \
             ) \
             SELECT {COLUMNS} FROM lineage ORDER BY hops ASC"
        );
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(id)
            .fetch_all(pool)
            .await
    }

    /// A node and its descendants down to `max_depth` levels below it
    /// (`None` for no bound), ordered by level.
    pub async fn find_subtree(
        pool: &PgPool,
        root_id: DbId,
        max_depth: Option<i32>,
    ) -> Result<Vec<NetworkNode>, sqlx::Error> {
        let query = format!(
            "WITH RECURSIVE subtree AS ( \
                 SELECT n.*, 0 AS depth FROM network_nodes n WHERE n.id = $1 \
                 UNION ALL \
                 SELECT c.*, s.depth + 1 FROM network_nodes c \
                 JOIN subtree s ON c.parent_id = s.id \
                 WHERE $2::INTEGER IS NULL OR s.depth < $2 \
             ) \
             SELECT {COLUMNS} FROM subtree ORDER BY level ASC, id ASC"
        );
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(root_id)
            .bind(max_depth)
            .fetch_all(pool)
            .await
    }

    /// Insert the network root. Fails with a `uq_network_nodes_single_root`
    /// violation if a root already exists.
    pub async fn create_root(
        pool: &PgPool,
        input: &CreateRootNode,
    ) -> Result<NetworkNode, sqlx::Error> {
        let query = format!(
            "INSERT INTO network_nodes (user_id, level, position, sponsorship_code) \
             VALUES ($1, 0, 'root', $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NetworkNode>(&query)
            .bind(input.user_id)
            .bind(&input.sponsorship_code)
            .fetch_one(pool)
            .await
    }

    /// Attach a member under `parent_id` on `side`, only if that slot is
    /// still empty.
    ///
    /// The parent row is locked with `FOR UPDATE` for the duration of the
    /// transaction, so concurrent writers to the same parent serialise and
    /// the loser sees [`SlotWrite::Occupied`]. Writers to other parents are
    /// not blocked. Either the insert and the parent link both commit or
    /// neither does.
    pub async fn create_at_slot(
        pool: &PgPool,
        input: &CreateNetworkNode,
    ) -> Result<SlotWrite, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let parent: Option<(i32, Option<DbId>, Option<DbId>)> = sqlx::query_as(
            "SELECT level, left_child_id, right_child_id FROM network_nodes \
             WHERE id = $1 FOR UPDATE",
        )
        .bind(input.parent_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((parent_level, left, right)) = parent else {
            return Ok(SlotWrite::ParentMissing);
        };
        let occupied = match input.side {
            Side::Left => left.is_some(),
            Side::Right => right.is_some(),
        };
        if occupied {
            tracing::debug!(
                parent_id = input.parent_id,
                side = %input.side,
                "Slot already occupied, nothing written"
            );
            return Ok(SlotWrite::Occupied);
        }

        let insert_query = format!(
            "INSERT INTO network_nodes \
                (user_id, sponsor_id, parent_id, level, position, sponsorship_code) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        let node = sqlx::query_as::<_, NetworkNode>(&insert_query)
            .bind(input.user_id)
            .bind(input.sponsor_id)
            .bind(input.parent_id)
            .bind(parent_level + 1)
            .bind(input.side.as_str())
            .bind(&input.sponsorship_code)
            .fetch_one(&mut *tx)
            .await?;

        let link_query = match input.side {
            Side::Left => {
                "UPDATE network_nodes SET left_child_id = $2, updated_at = NOW() WHERE id = $1"
            }
            Side::Right => {
                "UPDATE network_nodes SET right_child_id = $2, updated_at = NOW() WHERE id = $1"
            }
        };
        sqlx::query(link_query)
            .bind(input.parent_id)
            .bind(node.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(SlotWrite::Created(node))
    }
}
