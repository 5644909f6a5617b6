//! Left/right routes from the network root.
//!
//! A [`TreePath`] is a string of `0` (left) and `1` (right) digits whose
//! length equals the node's level. Comparing two paths by length and then
//! lexicographically reproduces breadth-first, left-before-right order,
//! which is the single ordering shared by the fallback scan and every
//! position-cache backend.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::network::node::{Node, Side};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(String);

impl TreePath {
    /// Path of the network root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse a path string, accepting only `0` and `1` digits.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if let Some(bad) = s.chars().find(|c| *c != '0' && *c != '1') {
            return Err(CoreError::Validation(format!(
                "Invalid tree path '{s}': unexpected character '{bad}'"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Path of the child on `side`.
    pub fn child(&self, side: Side) -> Self {
        let mut next = String::with_capacity(self.0.len() + 1);
        next.push_str(&self.0);
        next.push(side.path_digit());
        Self(next)
    }

    /// Number of edges from the network root.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this path lies in the subtree rooted at `ancestor`.
    pub fn is_within(&self, ancestor: &TreePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Compute the path of `node` from its ancestor chain.
    ///
    /// `ancestors` must be ordered nearest first (parent, grandparent, ...)
    /// and end at the network root.
    pub fn from_lineage(node: &Node, ancestors: &[Node]) -> Result<Self, CoreError> {
        let mut digits = Vec::with_capacity(ancestors.len());
        let mut current = node;

        for ancestor in ancestors {
            if current.parent_id != Some(ancestor.id) {
                return Err(CoreError::Internal(format!(
                    "Broken lineage: node {} does not hang under node {}",
                    current.id, ancestor.id
                )));
            }
            let side = current.position.side().ok_or_else(|| {
                CoreError::Internal(format!("Root node {} found mid-lineage", current.id))
            })?;
            digits.push(side.path_digit());
            current = ancestor;
        }

        if !current.is_root() {
            return Err(CoreError::Internal(format!(
                "Lineage of node {} stops at non-root node {}",
                node.id, current.id
            )));
        }

        let path: String = digits.into_iter().rev().collect();
        if path.len() != node.level as usize {
            return Err(CoreError::Internal(format!(
                "Node {} has level {} but lineage depth {}",
                node.id,
                node.level,
                path.len()
            )));
        }
        Ok(Self(path))
    }
}

impl Ord for TreePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TreePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for TreePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
