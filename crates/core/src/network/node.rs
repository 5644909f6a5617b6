//! Network node model: one member of the binary sponsorship tree.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Valid position values (stored in the `network_nodes.position` column).
pub const POSITION_LEFT: &str = "left";
pub const POSITION_RIGHT: &str = "right";
pub const POSITION_ROOT: &str = "root";

/// All valid position strings.
pub const VALID_POSITIONS: &[&str] = &[POSITION_LEFT, POSITION_RIGHT, POSITION_ROOT];

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// One of the two child slots of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Order in which slots of a single node are filled.
    pub const ORDER: [Side; 2] = [Side::Left, Side::Right];

    /// Convert from a database string value.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            POSITION_LEFT => Ok(Self::Left),
            POSITION_RIGHT => Ok(Self::Right),
            _ => Err(CoreError::Validation(format!(
                "Invalid side '{s}'. Must be one of: {POSITION_LEFT}, {POSITION_RIGHT}"
            ))),
        }
    }

    /// Convert to the database string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => POSITION_LEFT,
            Self::Right => POSITION_RIGHT,
        }
    }

    /// Path digit for this side (`'0'` left, `'1'` right).
    pub fn path_digit(&self) -> char {
        match self {
            Self::Left => '0',
            Self::Right => '1',
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a node hangs relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Left,
    Right,
    Root,
}

impl Position {
    /// Convert from a database string value.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            POSITION_LEFT => Ok(Self::Left),
            POSITION_RIGHT => Ok(Self::Right),
            POSITION_ROOT => Ok(Self::Root),
            _ => Err(CoreError::Validation(format!(
                "Invalid position '{s}'. Must be one of: {}",
                VALID_POSITIONS.join(", ")
            ))),
        }
    }

    /// Convert to the database string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => POSITION_LEFT,
            Self::Right => POSITION_RIGHT,
            Self::Root => POSITION_ROOT,
        }
    }

    /// The side this position occupies under its parent, `None` for the root.
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Left => Some(Side::Left),
            Self::Right => Some(Side::Right),
            Self::Root => None,
        }
    }
}

impl From<Side> for Position {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => Self::Left,
            Side::Right => Self::Right,
        }
    }
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// A member of the network tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: DbId,
    pub user_id: DbId,
    /// Node whose sponsorship code this member registered with. It is the
    /// root of the subtree the member was placed into, not necessarily the
    /// parent.
    pub sponsor_id: Option<DbId>,
    pub parent_id: Option<DbId>,
    pub left_child_id: Option<DbId>,
    pub right_child_id: Option<DbId>,
    /// Distance from the network root (root = 0).
    pub level: i32,
    pub position: Position,
    pub sponsorship_code: String,
    pub is_active: bool,
}

impl Node {
    /// The child occupying `side`, if any.
    pub fn child(&self, side: Side) -> Option<DbId> {
        match side {
            Side::Left => self.left_child_id,
            Side::Right => self.right_child_id,
        }
    }

    /// Child ids in fill order (left, then right), skipping empty slots.
    pub fn children(&self) -> impl Iterator<Item = DbId> + '_ {
        Side::ORDER.into_iter().filter_map(|side| self.child(side))
    }

    /// Empty slots in fill order.
    pub fn open_sides(&self) -> impl Iterator<Item = Side> + '_ {
        Side::ORDER
            .into_iter()
            .filter(|side| self.child(*side).is_none())
    }

    /// First empty slot, preferring left.
    pub fn first_open_side(&self) -> Option<Side> {
        self.open_sides().next()
    }

    pub fn is_root(&self) -> bool {
        self.position == Position::Root
    }

    /// Check the per-row invariants: only the root lacks a parent, the root
    /// sits at level 0 and no node is its own child.
    pub fn validate(&self) -> Result<(), CoreError> {
        match (self.position, self.parent_id) {
            (Position::Root, Some(parent)) => {
                return Err(CoreError::Validation(format!(
                    "Root node {} must not have a parent (found {parent})",
                    self.id
                )));
            }
            (Position::Left | Position::Right, None) => {
                return Err(CoreError::Validation(format!(
                    "Node {} at position '{}' has no parent",
                    self.id,
                    self.position.as_str()
                )));
            }
            _ => {}
        }

        if self.level < 0 || (self.is_root() != (self.level == 0)) {
            return Err(CoreError::Validation(format!(
                "Node {} has inconsistent level {} for position '{}'",
                self.id,
                self.level,
                self.position.as_str()
            )));
        }

        if self.children().any(|child| child == self.id) {
            return Err(CoreError::Validation(format!(
                "Node {} lists itself as a child",
                self.id
            )));
        }

        Ok(())
    }
}

/// Input for a slot write: attach a new member under `parent_id` on `side`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub parent_id: DbId,
    pub side: Side,
    pub user_id: DbId,
    pub sponsor_id: DbId,
    pub sponsorship_code: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
