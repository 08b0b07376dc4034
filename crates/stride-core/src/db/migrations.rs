//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply a migration's statements inside one transaction
async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately

    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

/// Migration to version 1: workout records
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Workout records, one row per canonical activity
        "CREATE TABLE IF NOT EXISTS workouts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            local_date TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at INTEGER NOT NULL,
            duration_secs INTEGER NOT NULL,
            distance_m REAL NOT NULL,
            avg_heart_rate REAL,
            max_heart_rate REAL,
            elevation_gain_m REAL,
            weather TEXT,
            source TEXT NOT NULL,
            sync_version INTEGER NOT NULL DEFAULT 1,
            client_id TEXT,
            last_synced_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        // Duplicate matching scans a user's start-time window
        "CREATE INDEX IF NOT EXISTS idx_workouts_user_started ON workouts(user_id, started_at)",
        "CREATE INDEX IF NOT EXISTS idx_workouts_user_date ON workouts(user_id, local_date)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: daily aggregates
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS daily_aggregates (
            user_id TEXT NOT NULL,
            local_date TEXT NOT NULL,
            run_count INTEGER NOT NULL,
            total_distance_m REAL NOT NULL,
            total_duration_secs INTEGER NOT NULL,
            avg_pace_secs_per_km REAL,
            longest_distance_m REAL NOT NULL,
            fastest_pace_secs_per_km REAL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, local_date)
        )",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: sync bookkeeping (state, history, idempotency)
async fn migrate_v3(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_state (
            user_id TEXT PRIMARY KEY,
            last_sync_at INTEGER NOT NULL,
            last_sync_id TEXT NOT NULL,
            server_cursor TEXT NOT NULL,
            total_syncs INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS sync_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            received INTEGER NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            unchanged INTEGER NOT NULL,
            conflicts INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            user_agent TEXT,
            client_addr TEXT,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_history_user ON sync_history(user_id, created_at DESC)",
        "CREATE TABLE IF NOT EXISTS idempotency_keys (
            user_id TEXT NOT NULL,
            idem_key TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            sync_id TEXT NOT NULL,
            response_body TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, idem_key)
        )",
        "CREATE INDEX IF NOT EXISTS idx_idempotency_expiry ON idempotency_keys(expires_at)",
        "INSERT INTO schema_version (version) VALUES (3)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
