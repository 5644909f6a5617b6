//! Binary-tree placement and caching engine.
//!
//! - [`planner::Planner`] picks the parent and side for a new member:
//!   position cache first, breadth-first scan of the sponsor subtree as the
//!   fallback, compare-and-set write through the [`store::NodeStore`].
//! - [`maintainer::CacheMaintainer`] keeps the [`cache::PositionCache`]
//!   queues and the [`cache::StatisticsCache`] in step with every placement.
//! - [`materializer::TreeMaterializer`] serves bounded subtree snapshots and
//!   downline statistics.
//! - [`engine::PlacementEngine`] wires them together for callers.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod maintainer;
pub mod materializer;
pub mod planner;
pub mod store;

pub use config::EngineConfig;
pub use engine::PlacementEngine;
pub use error::{CacheError, MaterializeError, PlacementError, RebuildError, StoreError};
pub use planner::{PlacementResult, SlotSource};
