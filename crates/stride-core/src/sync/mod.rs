//! Sync reconciliation pipeline: matching, conflict resolution, aggregate
//! recalculation, and the engine that drives one batch through all of them.

pub mod aggregates;
pub mod cursor;
pub mod engine;
pub mod matcher;
pub mod resolver;

pub use engine::{EngineOptions, SyncEngine, SyncReceipt};
pub use resolver::{ConflictPolicy, Decision, VersionCountPolicy};
