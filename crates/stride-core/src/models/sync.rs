//! Wire and bookkeeping types for the sync subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::workout::{WorkoutId, WorkoutInput, WorkoutRecord};

/// Whether the client is replaying its full archive or just recent activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(Error::InvalidInput(format!("unknown sync mode: {other}"))),
        }
    }
}

/// How an incoming record was reconciled against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Created,
    KeptServer,
    KeptClient,
    /// Reserved for field-merging policies; the default policy never emits it
    Merged,
}

/// Why the server's copy won a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The server record was already modified after creation
    ServerNewer,
}

/// Ephemeral conflict descriptor returned to the caller for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub client_id: Option<String>,
    pub server_id: WorkoutId,
    pub reason: ConflictReason,
    pub resolution: Resolution,
    /// The server's view of the record at resolution time
    pub server_record: WorkoutRecord,
}

/// One batch sync submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub workouts: Vec<WorkoutInput>,
    pub mode: SyncMode,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub client_sync_timestamp: Option<DateTime<Utc>>,
}

impl SyncRequest {
    /// Validate the batch before any engine state changes
    pub fn validate(&self, max_batch_size: usize) -> Result<()> {
        if self.workouts.len() > max_batch_size {
            return Err(Error::InvalidInput(format!(
                "batch of {} workouts exceeds the limit of {max_batch_size}",
                self.workouts.len()
            )));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "idempotencyKey must not be blank".to_string(),
                ));
            }
        }
        for workout in &self.workouts {
            workout.validate()?;
        }
        Ok(())
    }
}

/// Batch sync result returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub sync_id: Uuid,
    pub server_timestamp: DateTime<Utc>,
    /// Opaque cursor for a future incremental pull
    pub next_cursor: String,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub conflicts: Vec<SyncConflict>,
}

/// Per-user sync bookkeeping, mutated only by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSyncState {
    pub user_id: String,
    pub last_sync_at: i64,
    pub last_sync_id: String,
    pub server_cursor: String,
    pub total_syncs: i64,
}

/// Append-only audit row describing one processed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    pub id: String,
    pub user_id: String,
    pub mode: SyncMode,
    pub received: u32,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub conflicts: u32,
    pub duration_ms: i64,
    pub user_agent: Option<String>,
    pub client_addr: Option<String>,
    pub created_at: i64,
}

/// Cached response for one (user, idempotency key) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyEntry {
    pub user_id: String,
    pub key: String,
    /// SHA-256 of the canonical request payload
    pub payload_hash: String,
    pub sync_id: String,
    /// The exact bytes previously returned to the caller
    pub response_body: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl IdempotencyEntry {
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Network metadata captured for the audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerMetadata {
    pub user_agent: Option<String>,
    pub client_addr: Option<String>,
}
