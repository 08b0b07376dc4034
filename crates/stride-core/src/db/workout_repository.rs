//! Workout record repository

use chrono::NaiveDate;
use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{WorkoutId, WorkoutRecord};

/// Trait for workout storage operations.
///
/// Every method is scoped by the owning user id; there is deliberately no way
/// to read or mutate a record without one.
pub trait WorkoutRepository {
    /// Insert a new record
    async fn insert(&self, record: &WorkoutRecord) -> Result<()>;

    /// Overwrite an existing record (all mutable fields)
    async fn update(&self, record: &WorkoutRecord) -> Result<()>;

    /// Advance `last_synced_at` without touching data or version
    async fn touch_last_synced(&self, user_id: &str, id: &WorkoutId, at_ms: i64) -> Result<()>;

    /// Get a record by ID
    async fn get(&self, user_id: &str, id: &WorkoutId) -> Result<Option<WorkoutRecord>>;

    /// All records whose start time falls in `[from_ms, to_ms]`, both inclusive
    async fn find_started_between(
        &self,
        user_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<WorkoutRecord>>;

    /// All records on one local date
    async fn list_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<WorkoutRecord>>;
}

/// libSQL implementation of `WorkoutRepository`
pub struct LibsqlWorkoutRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibsqlWorkoutRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    const COLUMNS: &'static str = "id, user_id, local_date, started_at, ended_at, duration_secs, \
         distance_m, avg_heart_rate, max_heart_rate, elevation_gain_m, weather, source, \
         sync_version, client_id, last_synced_at, created_at, updated_at";

    /// Parse a workout record from a database row
    fn parse_record(row: &libsql::Row) -> Result<WorkoutRecord> {
        let id: String = row.get(0)?;
        let local_date: String = row.get(2)?;
        Ok(WorkoutRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid workout id: {id}")))?,
            user_id: row.get(1)?,
            local_date: local_date
                .parse()
                .map_err(|_| Error::Database(format!("invalid local date: {local_date}")))?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            duration_secs: row.get(5)?,
            distance_m: row.get(6)?,
            avg_heart_rate: row.get(7)?,
            max_heart_rate: row.get(8)?,
            elevation_gain_m: row.get(9)?,
            weather: row.get(10)?,
            source: row.get(11)?,
            sync_version: row.get(12)?,
            client_id: row.get(13)?,
            last_synced_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    async fn collect(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<WorkoutRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}

impl WorkoutRepository for LibsqlWorkoutRepository<'_> {
    async fn insert(&self, record: &WorkoutRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO workouts (id, user_id, local_date, started_at, ended_at, duration_secs,
                 distance_m, avg_heart_rate, max_heart_rate, elevation_gain_m, weather, source,
                 sync_version, client_id, last_synced_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    record.id.as_str(),
                    record.user_id.clone(),
                    record.local_date.to_string(),
                    record.started_at,
                    record.ended_at,
                    record.duration_secs,
                    record.distance_m,
                    record.avg_heart_rate,
                    record.max_heart_rate,
                    record.elevation_gain_m,
                    record.weather.clone(),
                    record.source.clone(),
                    record.sync_version,
                    record.client_id.clone(),
                    record.last_synced_at,
                    record.created_at,
                    record.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn update(&self, record: &WorkoutRecord) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE workouts SET local_date = ?1, started_at = ?2, ended_at = ?3,
                 duration_secs = ?4, distance_m = ?5, avg_heart_rate = ?6, max_heart_rate = ?7,
                 elevation_gain_m = ?8, weather = ?9, source = ?10, sync_version = ?11,
                 client_id = ?12, last_synced_at = ?13, updated_at = ?14
                 WHERE user_id = ?15 AND id = ?16",
                params![
                    record.local_date.to_string(),
                    record.started_at,
                    record.ended_at,
                    record.duration_secs,
                    record.distance_m,
                    record.avg_heart_rate,
                    record.max_heart_rate,
                    record.elevation_gain_m,
                    record.weather.clone(),
                    record.source.clone(),
                    record.sync_version,
                    record.client_id.clone(),
                    record.last_synced_at,
                    record.updated_at,
                    record.user_id.clone(),
                    record.id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    async fn touch_last_synced(&self, user_id: &str, id: &WorkoutId, at_ms: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE workouts SET last_synced_at = ?1 WHERE user_id = ?2 AND id = ?3",
                params![at_ms, user_id, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, user_id: &str, id: &WorkoutId) -> Result<Option<WorkoutRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {} FROM workouts WHERE user_id = ?1 AND id = ?2",
                    Self::COLUMNS
                ),
                params![user_id, id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_started_between(
        &self,
        user_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<WorkoutRecord>> {
        self.collect(
            &format!(
                "SELECT {} FROM workouts
                 WHERE user_id = ?1 AND started_at >= ?2 AND started_at <= ?3
                 ORDER BY started_at ASC",
                Self::COLUMNS
            ),
            params![user_id, from_ms, to_ms],
        )
        .await
    }

    async fn list_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<WorkoutRecord>> {
        self.collect(
            &format!(
                "SELECT {} FROM workouts
                 WHERE user_id = ?1 AND local_date = ?2
                 ORDER BY started_at ASC",
                Self::COLUMNS
            ),
            params![user_id, date.to_string()],
        )
        .await
    }
}
