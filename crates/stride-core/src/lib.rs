//! stride-core - Core library for Stride
//!
//! This crate contains the shared models, database layer, and sync
//! reconciliation engine used by the Stride API server.

pub mod db;
pub mod error;
pub mod models;
pub mod sync;

pub use error::{Error, Result};
pub use models::{WorkoutId, WorkoutRecord};
