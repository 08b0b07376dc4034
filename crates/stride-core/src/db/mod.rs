//! Database layer for Stride

mod aggregate_repository;
mod connection;
mod migrations;
mod sync_repository;
mod workout_repository;

pub use aggregate_repository::{AggregateRepository, LibsqlAggregateRepository};
pub use connection::Database;
pub use sync_repository::{
    IdempotencyRepository, LibsqlSyncRepository, SyncHistoryRepository, SyncStateRepository,
};
pub use workout_repository::{LibsqlWorkoutRepository, WorkoutRepository};
