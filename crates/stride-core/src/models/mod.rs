//! Shared models for Stride

mod aggregate;
mod sync;
mod workout;

pub use aggregate::DailyAggregate;
pub use sync::{
    CallerMetadata, ConflictReason, IdempotencyEntry, Resolution, SyncConflict, SyncHistoryEntry,
    SyncMode, SyncRequest, SyncResponse, UserSyncState,
};
pub use workout::{WorkoutId, WorkoutInput, WorkoutRecord};
