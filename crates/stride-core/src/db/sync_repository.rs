//! Sync bookkeeping repositories: state, history, idempotency

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{IdempotencyEntry, SyncHistoryEntry, SyncMode, UserSyncState};

/// Per-user sync cursor/bookkeeping, mutated only by the engine
pub trait SyncStateRepository {
    /// Fetch the current state row, if the user has synced before
    async fn get(&self, user_id: &str) -> Result<Option<UserSyncState>>;

    /// Upsert the state row for a completed batch and bump `total_syncs`
    async fn record_sync(
        &self,
        user_id: &str,
        sync_id: &str,
        at_ms: i64,
        cursor: &str,
    ) -> Result<()>;
}

/// Append-only audit trail of processed batches
pub trait SyncHistoryRepository {
    /// Append one row; never mutated afterwards
    async fn append(&self, entry: &SyncHistoryEntry) -> Result<()>;

    /// Most recent entries for a user, newest first
    async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<SyncHistoryEntry>>;
}

/// Cached responses keyed by (user, idempotency key)
pub trait IdempotencyRepository {
    async fn get(&self, user_id: &str, key: &str) -> Result<Option<IdempotencyEntry>>;

    async fn put(&self, entry: &IdempotencyEntry) -> Result<()>;

    async fn delete(&self, user_id: &str, key: &str) -> Result<()>;

    /// Drop every entry whose expiry has passed
    async fn purge_expired(&self, now_ms: i64) -> Result<u64>;
}

/// libSQL implementation of the sync bookkeeping repositories
pub struct LibsqlSyncRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibsqlSyncRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn parse_history(row: &libsql::Row) -> Result<SyncHistoryEntry> {
        let mode: String = row.get(2)?;
        Ok(SyncHistoryEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            mode: mode.parse()?,
            received: row.get::<i64>(3)? as u32,
            created: row.get::<i64>(4)? as u32,
            updated: row.get::<i64>(5)? as u32,
            unchanged: row.get::<i64>(6)? as u32,
            conflicts: row.get::<i64>(7)? as u32,
            duration_ms: row.get(8)?,
            user_agent: row.get(9)?,
            client_addr: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl SyncStateRepository for LibsqlSyncRepository<'_> {
    async fn get(&self, user_id: &str) -> Result<Option<UserSyncState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, last_sync_at, last_sync_id, server_cursor, total_syncs
                 FROM sync_state WHERE user_id = ?1",
                params![user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(UserSyncState {
                user_id: row.get(0)?,
                last_sync_at: row.get(1)?,
                last_sync_id: row.get(2)?,
                server_cursor: row.get(3)?,
                total_syncs: row.get(4)?,
            })),
            None => Ok(None),
        }
    }

    async fn record_sync(
        &self,
        user_id: &str,
        sync_id: &str,
        at_ms: i64,
        cursor: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_state (user_id, last_sync_at, last_sync_id, server_cursor, total_syncs)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT (user_id) DO UPDATE SET
                   last_sync_at = excluded.last_sync_at,
                   last_sync_id = excluded.last_sync_id,
                   server_cursor = excluded.server_cursor,
                   total_syncs = sync_state.total_syncs + 1",
                params![user_id, at_ms, sync_id, cursor],
            )
            .await?;
        Ok(())
    }
}

impl SyncHistoryRepository for LibsqlSyncRepository<'_> {
    async fn append(&self, entry: &SyncHistoryEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_history (id, user_id, mode, received, created, updated,
                 unchanged, conflicts, duration_ms, user_agent, client_addr, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.id.clone(),
                    entry.user_id.clone(),
                    entry.mode.as_str(),
                    i64::from(entry.received),
                    i64::from(entry.created),
                    i64::from(entry.updated),
                    i64::from(entry.unchanged),
                    i64::from(entry.conflicts),
                    entry.duration_ms,
                    entry.user_agent.clone(),
                    entry.client_addr.clone(),
                    entry.created_at
                ],
            )
            .await?;
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
    async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<SyncHistoryEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, mode, received, created, updated, unchanged, conflicts,
                 duration_ms, user_agent, client_addr, created_at
                 FROM sync_history WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
                params![user_id, limit as i64],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_history(&row)?);
        }
        Ok(entries)
    }
}

impl IdempotencyRepository for LibsqlSyncRepository<'_> {
    async fn get(&self, user_id: &str, key: &str) -> Result<Option<IdempotencyEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, idem_key, payload_hash, sync_id, response_body, created_at, expires_at
                 FROM idempotency_keys WHERE user_id = ?1 AND idem_key = ?2",
                params![user_id, key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(IdempotencyEntry {
                user_id: row.get(0)?,
                key: row.get(1)?,
                payload_hash: row.get(2)?,
                sync_id: row.get(3)?,
                response_body: row.get(4)?,
                created_at: row.get(5)?,
                expires_at: row.get(6)?,
            })),
            None => Ok(None),
        }
    }

    async fn put(&self, entry: &IdempotencyEntry) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO idempotency_keys
                 (user_id, idem_key, payload_hash, sync_id, response_body, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.user_id.clone(),
                    entry.key.clone(),
                    entry.payload_hash.clone(),
                    entry.sync_id.clone(),
                    entry.response_body.clone(),
                    entry.created_at,
                    entry.expires_at
                ],
            )
            .await?;

        // A lost insert race here means another batch already cached a
        // response under this key; that response is the canonical one.
        if rows == 0 {
            return Err(Error::Database(format!(
                "idempotency key already cached for user: {}",
                entry.key
            )));
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, key: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM idempotency_keys WHERE user_id = ?1 AND idem_key = ?2",
                params![user_id, key],
            )
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let purged = self
            .conn
            .execute(
                "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
                params![now_ms],
            )
            .await?;
        Ok(purged)
    }
}
