//! Sync engine
//!
//! Orchestrates one batch per invocation:
//! check idempotency → process records → recalculate aggregates →
//! update sync state → record history → cache response → return.
//!
//! Batches for the same user are serialized on a per-user lock so two
//! devices syncing at once cannot both see "no match" and insert the same
//! activity twice. All writes for a batch happen inside one transaction;
//! a failure anywhere rolls back the whole batch, leaving retries to the
//! caller (made safe by the idempotency cache).

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use libsql::Connection;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    Database, IdempotencyRepository, LibsqlAggregateRepository, LibsqlSyncRepository,
    LibsqlWorkoutRepository, SyncHistoryRepository, SyncStateRepository, WorkoutRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    CallerMetadata, IdempotencyEntry, Resolution, SyncConflict, SyncHistoryEntry, SyncRequest,
    SyncResponse, WorkoutRecord,
};
use crate::sync::resolver::{ConflictPolicy, Decision, VersionCountPolicy};
use crate::sync::{aggregates, cursor, matcher};

/// Tunables for one engine instance
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Duplicate matcher window half-width
    pub duplicate_tolerance: Duration,
    /// How long cached responses stay replayable
    pub idempotency_ttl: Duration,
    /// Largest accepted batch
    pub max_batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            duplicate_tolerance: matcher::DEFAULT_TOLERANCE,
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            max_batch_size: 500,
        }
    }
}

/// What the engine hands back to the transport layer.
///
/// `body` is the exact serialized response; replays return the cached bytes
/// untouched so retried submissions observe a byte-identical response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReceipt {
    pub body: String,
    pub sync_id: String,
    pub replayed: bool,
}

/// The sync orchestrator
pub struct SyncEngine {
    db: Arc<Database>,
    policy: Arc<dyn ConflictPolicy>,
    options: EngineOptions,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // The shared libSQL connection supports one transaction at a time
    write_lock: Mutex<()>,
}

impl SyncEngine {
    /// Create an engine with the default conflict policy and options
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_policy(db, Arc::new(VersionCountPolicy))
    }

    /// Create an engine with a custom conflict policy
    pub fn with_policy(db: Arc<Database>, policy: Arc<dyn ConflictPolicy>) -> Self {
        Self {
            db,
            policy,
            options: EngineOptions::default(),
            user_locks: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Override the engine tunables
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Process one batch for one user.
    ///
    /// Validation and authentication failures surface before any state
    /// changes; storage failures roll the whole batch back.
    pub async fn process(
        &self,
        user_id: &str,
        request: &SyncRequest,
        meta: &CallerMetadata,
    ) -> Result<SyncReceipt> {
        request.validate(self.options.max_batch_size)?;

        let user_lock = self.lock_for_user(user_id).await;
        let _user_guard = user_lock.lock().await;
        let _write_guard = self.write_lock.lock().await;

        let conn = self.db.connection();
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let payload_hash = hash_payload(request)?;

        if let Some(key) = request.idempotency_key.as_deref() {
            let idem = LibsqlSyncRepository::new(conn);
            if let Some(entry) = IdempotencyRepository::get(&idem, user_id, key).await? {
                if entry.is_expired(now_ms) {
                    idem.delete(user_id, key).await?;
                } else if entry.payload_hash != payload_hash {
                    tracing::warn!(
                        user = user_fingerprint(user_id),
                        "Idempotency key reused with a different payload"
                    );
                    return Err(Error::IdempotencyMismatch);
                } else {
                    tracing::info!(
                        user = user_fingerprint(user_id),
                        sync_id = %entry.sync_id,
                        "Replayed cached sync response"
                    );
                    return Ok(SyncReceipt {
                        body: entry.response_body,
                        sync_id: entry.sync_id,
                        replayed: false,
                    }
                    .into_replay());
                }
            }
        }

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        match self
            .run_batch(conn, user_id, request, meta, now, now_ms, &payload_hash)
            .await
        {
            Ok(receipt) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(receipt)
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        conn: &Connection,
        user_id: &str,
        request: &SyncRequest,
        meta: &CallerMetadata,
        now: chrono::DateTime<Utc>,
        now_ms: i64,
        payload_hash: &str,
    ) -> Result<SyncReceipt> {
        let started = Instant::now();
        let workouts = LibsqlWorkoutRepository::new(conn);
        let aggregate_rows = LibsqlAggregateRepository::new(conn);
        let bookkeeping = LibsqlSyncRepository::new(conn);

        let sync_id = Uuid::now_v7();
        let mut created = 0u32;
        let mut updated = 0u32;
        let mut unchanged = 0u32;
        let mut conflicts: Vec<SyncConflict> = Vec::new();
        let mut affected_dates = BTreeSet::new();

        // Records transition independently, in submission order
        for input in &request.workouts {
            let matched = matcher::find_duplicate(
                &workouts,
                user_id,
                input.started_at_ms(),
                self.options.duplicate_tolerance,
            )
            .await?;

            match self.policy.decide(matched.as_ref(), input) {
                Decision::Create => {
                    let record = WorkoutRecord::from_input(user_id, input, now_ms);
                    workouts.insert(&record).await?;
                    affected_dates.insert(record.local_date);
                    created += 1;
                }
                Decision::Unchanged => {
                    let existing = require_match(matched)?;
                    workouts
                        .touch_last_synced(user_id, &existing.id, now_ms)
                        .await?;
                    unchanged += 1;
                }
                Decision::ServerWins(reason) => {
                    let existing = require_match(matched)?;
                    conflicts.push(SyncConflict {
                        client_id: input.client_id.clone(),
                        server_id: existing.id,
                        reason,
                        resolution: Resolution::KeptServer,
                        server_record: existing,
                    });
                }
                Decision::ClientWins => {
                    let mut existing = require_match(matched)?;
                    // A start-time correction can move the record across days
                    affected_dates.insert(existing.local_date);
                    existing.apply_input(input, now_ms);
                    workouts.update(&existing).await?;
                    affected_dates.insert(existing.local_date);
                    updated += 1;
                }
            }
        }

        aggregates::recalculate(&workouts, &aggregate_rows, user_id, &affected_dates, now_ms)
            .await?;

        let next_cursor = cursor::encode_cursor(now_ms);
        bookkeeping
            .record_sync(user_id, &sync_id.to_string(), now_ms, &next_cursor)
            .await?;

        let response = SyncResponse {
            success: true,
            sync_id,
            server_timestamp: now,
            next_cursor,
            created,
            updated,
            unchanged,
            conflicts,
        };
        let body = serde_json::to_string(&response)?;

        let conflict_count = u32::try_from(response.conflicts.len()).unwrap_or(u32::MAX);
        bookkeeping
            .append(&SyncHistoryEntry {
                id: Uuid::now_v7().to_string(),
                user_id: user_id.to_string(),
                mode: request.mode,
                received: u32::try_from(request.workouts.len()).unwrap_or(u32::MAX),
                created,
                updated,
                unchanged,
                conflicts: conflict_count,
                duration_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
                user_agent: meta.user_agent.clone(),
                client_addr: meta.client_addr.clone(),
                created_at: now_ms,
            })
            .await?;

        if let Some(key) = request.idempotency_key.as_deref() {
            bookkeeping.purge_expired(now_ms).await?;
            let ttl_ms = i64::try_from(self.options.idempotency_ttl.as_millis()).unwrap_or(i64::MAX);
            bookkeeping
                .put(&IdempotencyEntry {
                    user_id: user_id.to_string(),
                    key: key.to_string(),
                    payload_hash: payload_hash.to_string(),
                    sync_id: sync_id.to_string(),
                    response_body: body.clone(),
                    created_at: now_ms,
                    expires_at: now_ms.saturating_add(ttl_ms),
                })
                .await?;
        }

        tracing::info!(
            user = user_fingerprint(user_id),
            sync_id = %sync_id,
            mode = request.mode.as_str(),
            created,
            updated,
            unchanged,
            conflicts = conflict_count,
            "Processed sync batch"
        );

        Ok(SyncReceipt {
            body,
            sync_id: sync_id.to_string(),
            replayed: false,
        })
    }

    async fn lock_for_user(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut guard = self.user_locks.lock().await;
        // A strong count of 1 means no in-flight batch holds the lock
        guard.retain(|_, lock| Arc::strong_count(lock) > 1);
        guard
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl SyncReceipt {
    fn into_replay(mut self) -> Self {
        self.replayed = true;
        self
    }
}

fn require_match(matched: Option<WorkoutRecord>) -> Result<WorkoutRecord> {
    matched.ok_or_else(|| {
        Error::Database("conflict policy produced a matched decision without a match".to_string())
    })
}

fn hash_payload(request: &SyncRequest) -> Result<String> {
    let canonical = serde_json::to_string(request)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{SyncMode, WorkoutInput};

    async fn engine() -> SyncEngine {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        SyncEngine::new(db)
    }

    fn input(start: &str, duration_secs: i64, distance_m: f64) -> WorkoutInput {
        let start_time: chrono::DateTime<chrono::FixedOffset> = start.parse().unwrap();
        WorkoutInput {
            client_id: Some(format!("client-{start}")),
            start_time,
            end_time: start_time + chrono::Duration::seconds(duration_secs),
            duration_seconds: duration_secs,
            distance_meters: distance_m,
            avg_heart_rate: None,
            max_heart_rate: None,
            elevation_gain_meters: None,
            weather: None,
            source: "garmin".to_string(),
        }
    }

    fn request(workouts: Vec<WorkoutInput>) -> SyncRequest {
        SyncRequest {
            workouts,
            mode: SyncMode::Full,
            idempotency_key: None,
            client_sync_timestamp: None,
        }
    }

    fn parse(receipt: &SyncReceipt) -> SyncResponse {
        serde_json::from_str(&receipt.body).unwrap()
    }

    async fn workout_count(engine: &SyncEngine, user_id: &str) -> i64 {
        let mut rows = engine
            .db
            .connection()
            .query(
                "SELECT COUNT(*) FROM workouts WHERE user_id = ?1",
                libsql::params![user_id],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_submission_creates() {
        let engine = engine().await;
        let req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);

        let receipt = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let response = parse(&receipt);

        assert!(response.success);
        assert_eq!(response.created, 1);
        assert_eq!(response.unchanged, 0);
        assert_eq!(workout_count(&engine, "user-1").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_identical_resubmission_is_unchanged() {
        let engine = engine().await;
        let req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);

        engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let receipt = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let response = parse(&receipt);

        assert_eq!(response.created, 0);
        assert_eq!(response.unchanged, 1);
        assert_eq!(workout_count(&engine, "user-1").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drifted_resubmission_with_new_data_updates() {
        let engine = engine().await;
        engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();

        // Same activity re-exported 30s off with a corrected distance
        let receipt = engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:30Z", 1800, 5200.0)]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();
        let response = parse(&receipt);

        assert_eq!(response.updated, 1);
        assert_eq!(workout_count(&engine, "user-1").await, 1);

        let mut rows = engine
            .db
            .connection()
            .query(
                "SELECT distance_m, sync_version FROM workouts WHERE user_id = 'user-1'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert!((row.get::<f64>(0).unwrap() - 5200.0).abs() < f64::EPSILON);
        assert_eq!(row.get::<i64>(1).unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_modified_server_record_wins_conflict() {
        let engine = engine().await;
        // Create, then update so sync_version reaches 2
        engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();
        engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:00Z", 1800, 5200.0)]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();

        // Third submission differs again; the server copy is now "modified"
        let receipt = engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:10Z", 1800, 5400.0)]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();
        let response = parse(&receipt);

        assert_eq!(response.updated, 0);
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(response.conflicts[0].resolution, Resolution::KeptServer);
        assert_eq!(
            response.conflicts[0].server_record.sync_version,
            2,
            "server copy must be untouched"
        );
        assert_eq!(workout_count(&engine, "user-1").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_aggregates_recomputed_per_affected_date() {
        let engine = engine().await;
        let receipt = engine
            .process(
                "user-1",
                &request(vec![
                    input("2025-01-15T08:00:00Z", 1500, 5000.0),
                    input("2025-01-15T18:00:00Z", 3600, 10_000.0),
                    input("2025-01-16T08:00:00Z", 1800, 5000.0),
                ]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(parse(&receipt).created, 3);

        let mut rows = engine
            .db
            .connection()
            .query(
                "SELECT local_date, run_count, total_distance_m, total_duration_secs
                 FROM daily_aggregates WHERE user_id = 'user-1' ORDER BY local_date",
                (),
            )
            .await
            .unwrap();

        let first = rows.next().await.unwrap().unwrap();
        assert_eq!(first.get::<String>(0).unwrap(), "2025-01-15");
        assert_eq!(first.get::<i64>(1).unwrap(), 2);
        assert!((first.get::<f64>(2).unwrap() - 15_000.0).abs() < f64::EPSILON);
        assert_eq!(first.get::<i64>(3).unwrap(), 5100);

        let second = rows.next().await.unwrap().unwrap();
        assert_eq!(second.get::<String>(0).unwrap(), "2025-01-16");
        assert_eq!(second.get::<i64>(1).unwrap(), 1);

        assert!(rows.next().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idempotent_replay_is_byte_identical() {
        let engine = engine().await;
        let mut req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);
        req.idempotency_key = Some("batch-1".to_string());

        let first = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let second = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(first.sync_id, second.sync_id);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(workout_count(&engine, "user-1").await, 1);

        // Replay must not write a second history row
        let mut rows = engine
            .db
            .connection()
            .query(
                "SELECT COUNT(*) FROM sync_history WHERE user_id = 'user-1'",
                (),
            )
            .await
            .unwrap();
        let history: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(history, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idempotency_key_with_different_payload_is_rejected() {
        let engine = engine().await;
        let mut req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);
        req.idempotency_key = Some("batch-1".to_string());
        engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();

        let mut other = request(vec![input("2025-02-01T08:00:00Z", 1800, 8000.0)]);
        other.idempotency_key = Some("batch-1".to_string());
        let err = engine
            .process("user-1", &other, &CallerMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdempotencyMismatch));
        assert_eq!(workout_count(&engine, "user-1").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_key_is_independent_per_user() {
        let engine = engine().await;
        let mut req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);
        req.idempotency_key = Some("batch-1".to_string());

        engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let receipt = engine
            .process("user-2", &req, &CallerMetadata::default())
            .await
            .unwrap();

        assert!(!receipt.replayed);
        assert_eq!(workout_count(&engine, "user-1").await, 1);
        assert_eq!(workout_count(&engine, "user-2").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tenant_isolation_across_identical_submissions() {
        let engine = engine().await;
        let req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);

        let first = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let second = engine
            .process("user-2", &req, &CallerMetadata::default())
            .await
            .unwrap();

        // user-2's submission must not match user-1's record
        assert_eq!(parse(&first).created, 1);
        assert_eq!(parse(&second).created, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_state_advances_monotonically() {
        let engine = engine().await;
        let req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);

        engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let receipt = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap();
        let response = parse(&receipt);

        let bookkeeping = LibsqlSyncRepository::new(engine.db.connection());
        let state = SyncStateRepository::get(&bookkeeping, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.total_syncs, 2);
        assert_eq!(state.last_sync_id, receipt.sync_id);
        assert_eq!(state.server_cursor, response.next_cursor);
        assert_eq!(
            crate::sync::cursor::decode_cursor(&state.server_cursor).unwrap(),
            state.last_sync_at
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_history_captures_caller_metadata() {
        let engine = engine().await;
        let meta = CallerMetadata {
            user_agent: Some("stride-mobile/1.0".to_string()),
            client_addr: Some("203.0.113.7".to_string()),
        };
        engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]),
                &meta,
            )
            .await
            .unwrap();

        let bookkeeping = LibsqlSyncRepository::new(engine.db.connection());
        let entries = bookkeeping.list_recent("user-1", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].received, 1);
        assert_eq!(entries[0].created, 1);
        assert_eq!(entries[0].user_agent.as_deref(), Some("stride-mobile/1.0"));
        assert_eq!(entries[0].client_addr.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_batch_leaves_no_trace() {
        let engine = engine().await;
        let mut bad = input("2025-01-15T08:00:00Z", 1800, 5000.0);
        bad.duration_seconds = -5;
        let mut req = request(vec![bad]);
        req.idempotency_key = Some("batch-1".to_string());

        let err = engine
            .process("user-1", &req, &CallerMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        assert_eq!(workout_count(&engine, "user-1").await, 0);
        let bookkeeping = LibsqlSyncRepository::new(engine.db.connection());
        assert!(
            IdempotencyRepository::get(&bookkeeping, "user-1", "batch-1")
                .await
                .unwrap()
                .is_none(),
            "a rejected batch must not cache a response"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_batch_still_advances_state() {
        let engine = engine().await;
        let receipt = engine
            .process("user-1", &request(vec![]), &CallerMetadata::default())
            .await
            .unwrap();
        let response = parse(&receipt);

        assert_eq!(response.created + response.updated + response.unchanged, 0);

        let bookkeeping = LibsqlSyncRepository::new(engine.db.connection());
        let state = SyncStateRepository::get(&bookkeeping, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.total_syncs, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_identical_batches_create_one_record() {
        let engine = Arc::new(engine().await);

        // Two devices re-exporting the same run at once must not both see
        // "no match" and insert it twice
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);
                engine
                    .process("user-1", &req, &CallerMetadata::default())
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            let response = parse(&handle.await.unwrap());
            created += response.created;
        }

        assert_eq!(created, 1);
        assert_eq!(workout_count(&engine, "user-1").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_batches_for_distinct_users_stay_isolated() {
        let engine = Arc::new(engine().await);

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let req = request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]);
                engine
                    .process(&format!("user-{i}"), &req, &CallerMetadata::default())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..4 {
            assert_eq!(workout_count(&engine, &format!("user-{i}")).await, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idle_user_locks_are_evicted() {
        let engine = engine().await;
        for i in 0..10 {
            engine
                .process(
                    &format!("user-{i}"),
                    &request(vec![]),
                    &CallerMetadata::default(),
                )
                .await
                .unwrap();
        }

        // Acquiring any lock sweeps entries no batch is holding
        let held = engine.lock_for_user("user-x").await;
        let map = engine.user_locks.lock().await;
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("user-x"));
        drop(map);
        drop(held);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_with_mixed_outcomes() {
        let engine = engine().await;
        engine
            .process(
                "user-1",
                &request(vec![input("2025-01-15T08:00:00Z", 1800, 5000.0)]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();

        let receipt = engine
            .process(
                "user-1",
                &request(vec![
                    // Identical: unchanged
                    input("2025-01-15T08:00:00Z", 1800, 5000.0),
                    // Brand new day: created
                    input("2025-01-20T08:00:00Z", 1800, 6000.0),
                ]),
                &CallerMetadata::default(),
            )
            .await
            .unwrap();
        let response = parse(&receipt);

        assert_eq!(response.created, 1);
        assert_eq!(response.unchanged, 1);
        assert_eq!(response.updated, 0);
        assert_eq!(workout_count(&engine, "user-1").await, 2);
    }
}
