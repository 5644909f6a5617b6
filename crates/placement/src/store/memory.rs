//! In-process [`NodeStore`] with the same compare-and-set contract as the
//! PostgreSQL store. Intended for tests and local tooling.

use std::collections::HashMap;

use async_trait::async_trait;
use sponsornet_core::network::{NewNode, Node, Position, Side};
use sponsornet_core::types::DbId;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::NodeStore;

#[derive(Default)]
struct Tree {
    nodes: HashMap<DbId, Node>,
    next_id: DbId,
}

impl Tree {
    fn find(&self, pred: impl Fn(&Node) -> bool) -> Option<Node> {
        self.nodes.values().find(|n| pred(n)).cloned()
    }

    fn allocate_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn check_unique(&self, user_id: DbId, code: &str) -> Result<(), StoreError> {
        if self.nodes.values().any(|n| n.user_id == user_id) {
            return Err(StoreError::DuplicateMember { user_id });
        }
        if self.nodes.values().any(|n| n.sponsorship_code == code) {
            return Err(StoreError::DuplicateCode(code.to_string()));
        }
        Ok(())
    }
}

/// A whole tree behind one mutex.
#[derive(Default)]
pub struct MemoryNodeStore {
    tree: Mutex<Tree>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes, root included.
    pub async fn len(&self) -> usize {
        self.tree.lock().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored node, ordered by id.
    pub async fn all_nodes(&self) -> Vec<Node> {
        let tree = self.tree.lock().await;
        let mut nodes: Vec<Node> = tree.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// Flip a member's active flag. Returns `false` for unknown ids.
    pub async fn set_active(&self, id: DbId, is_active: bool) -> bool {
        let mut tree = self.tree.lock().await;
        match tree.nodes.get_mut(&id) {
            Some(node) => {
                node.is_active = is_active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn fetch_node(&self, id: DbId) -> Result<Option<Node>, StoreError> {
        Ok(self.tree.lock().await.nodes.get(&id).cloned())
    }

    async fn fetch_node_by_user(&self, user_id: DbId) -> Result<Option<Node>, StoreError> {
        Ok(self.tree.lock().await.find(|n| n.user_id == user_id))
    }

    async fn fetch_node_by_code(&self, code: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.tree.lock().await.find(|n| n.sponsorship_code == code))
    }

    async fn fetch_root(&self) -> Result<Option<Node>, StoreError> {
        Ok(self.tree.lock().await.find(Node::is_root))
    }

    async fn fetch_nodes(&self, ids: &[DbId]) -> Result<Vec<Node>, StoreError> {
        let tree = self.tree.lock().await;
        Ok(ids.iter().filter_map(|id| tree.nodes.get(id).cloned()).collect())
    }

    async fn fetch_children(&self, id: DbId) -> Result<Vec<Node>, StoreError> {
        let tree = self.tree.lock().await;
        let parent = tree.nodes.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(parent
            .children()
            .filter_map(|child| tree.nodes.get(&child).cloned())
            .collect())
    }

    async fn fetch_ancestors(&self, id: DbId) -> Result<Vec<Node>, StoreError> {
        let tree = self.tree.lock().await;
        let mut current = tree.nodes.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut ancestors = Vec::with_capacity(current.level.max(0) as usize);
        while let Some(parent_id) = current.parent_id {
            current = tree.nodes.get(&parent_id).ok_or(StoreError::NotFound(parent_id))?;
            ancestors.push(current.clone());
        }
        Ok(ancestors)
    }

    async fn fetch_subtree(
        &self,
        root_id: DbId,
        max_depth: Option<u32>,
    ) -> Result<Vec<Node>, StoreError> {
        let tree = self.tree.lock().await;
        let root = tree.nodes.get(&root_id).ok_or(StoreError::NotFound(root_id))?;
        let mut out = vec![root.clone()];
        let mut level = vec![root];
        let mut depth = 0u32;

        while !level.is_empty() && max_depth.map_or(true, |limit| depth < limit) {
            let mut next = Vec::with_capacity(level.len() * 2);
            for node in &level {
                next.extend(node.children().filter_map(|child| tree.nodes.get(&child)));
            }
            out.extend(next.iter().map(|n| (*n).clone()));
            level = next;
            depth += 1;
        }
        Ok(out)
    }

    async fn create_root(&self, user_id: DbId, sponsorship_code: &str) -> Result<Node, StoreError> {
        let mut tree = self.tree.lock().await;
        if tree.nodes.values().any(Node::is_root) {
            return Err(StoreError::RootExists);
        }
        tree.check_unique(user_id, sponsorship_code)?;

        let node = Node {
            id: tree.allocate_id(),
            user_id,
            sponsor_id: None,
            parent_id: None,
            left_child_id: None,
            right_child_id: None,
            level: 0,
            position: Position::Root,
            sponsorship_code: sponsorship_code.to_string(),
            is_active: true,
        };
        tree.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn create_node_at_slot(&self, input: &NewNode) -> Result<Node, StoreError> {
        let mut tree = self.tree.lock().await;
        let parent = tree
            .nodes
            .get(&input.parent_id)
            .ok_or(StoreError::NotFound(input.parent_id))?;
        if parent.child(input.side).is_some() {
            return Err(StoreError::SlotOccupied {
                parent_id: input.parent_id,
                side: input.side,
            });
        }
        let level = parent.level + 1;
        tree.check_unique(input.user_id, &input.sponsorship_code)?;

        let node = Node {
            id: tree.allocate_id(),
            user_id: input.user_id,
            sponsor_id: Some(input.sponsor_id),
            parent_id: Some(input.parent_id),
            left_child_id: None,
            right_child_id: None,
            level,
            position: input.side.into(),
            sponsorship_code: input.sponsorship_code.clone(),
            is_active: true,
        };

        if let Some(parent) = tree.nodes.get_mut(&input.parent_id) {
            match input.side {
                Side::Left => parent.left_child_id = Some(node.id),
                Side::Right => parent.right_child_id = Some(node.id),
            }
        }
        tree.nodes.insert(node.id, node.clone());
        Ok(node)
    }
}
