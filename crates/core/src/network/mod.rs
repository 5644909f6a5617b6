//! Binary sponsorship tree: nodes, slots, ordering and aggregation.
//!
//! Every function here is pure. The placement engine loads nodes from the
//! authoritative store and hands them to these types.

pub mod node;
pub mod path;
pub mod scan;
pub mod slot;
pub mod snapshot;
pub mod statistics;

pub use node::{NewNode, Node, Position, Side};
pub use path::TreePath;
pub use scan::Frontier;
pub use slot::AvailablePosition;
pub use snapshot::{SnapshotNode, SubtreeSnapshot};
pub use statistics::TreeStatistics;
