//! Conflict resolver
//!
//! A pure decision function over (existing, incoming). All I/O stays with the
//! engine, which executes whichever branch the decision names, so the policy
//! is table-testable without any storage.

use crate::models::{ConflictReason, WorkoutInput, WorkoutRecord};

/// Start/end drift below which two submissions describe the same instant
const TIMESTAMP_TOLERANCE_MS: i64 = 1_000;
/// Distance drift below which two submissions cover the same ground
const DISTANCE_TOLERANCE_M: f64 = 1.0;

/// What the engine should do with one incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No match: insert a fresh record at version 1
    Create,
    /// Match with equivalent data: touch `last_synced_at` only
    Unchanged,
    /// Match with differing data; the server copy wins and the incoming
    /// data is discarded
    ServerWins(ConflictReason),
    /// Match with differing data; overwrite mutable fields and bump version
    ClientWins,
}

/// Pluggable comparison strategy deciding how a matched pair reconciles.
///
/// Swappable so the policy can evolve (e.g. per-field timestamps) without
/// touching the engine or storage.
pub trait ConflictPolicy: Send + Sync {
    fn decide(&self, existing: Option<&WorkoutRecord>, incoming: &WorkoutInput) -> Decision;
}

/// Default policy: a `sync_version` above 1 is treated as a proxy for "the
/// server copy was modified after creation" and wins the conflict.
///
/// Not a true last-write-wins scheme; it errs on the side of keeping server
/// edits over re-exported client data.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionCountPolicy;

impl ConflictPolicy for VersionCountPolicy {
    fn decide(&self, existing: Option<&WorkoutRecord>, incoming: &WorkoutInput) -> Decision {
        let Some(existing) = existing else {
            return Decision::Create;
        };

        if materially_equal(existing, incoming) {
            return Decision::Unchanged;
        }

        if existing.sync_version > 1 {
            Decision::ServerWins(ConflictReason::ServerNewer)
        } else {
            Decision::ClientWins
        }
    }
}

/// Whether an incoming submission describes the same activity data the
/// server already holds: start/end within 1 second, duration exact,
/// distance within 1 meter, same source.
#[must_use]
pub fn materially_equal(existing: &WorkoutRecord, incoming: &WorkoutInput) -> bool {
    (existing.started_at - incoming.started_at_ms()).abs() <= TIMESTAMP_TOLERANCE_MS
        && (existing.ended_at - incoming.ended_at_ms()).abs() <= TIMESTAMP_TOLERANCE_MS
        && existing.duration_secs == incoming.duration_seconds
        && (existing.distance_m - incoming.distance_meters).abs() <= DISTANCE_TOLERANCE_M
        && existing.source == incoming.source
}
