//! Daily aggregate repository

use chrono::NaiveDate;
use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::DailyAggregate;

/// Trait for daily aggregate storage operations
pub trait AggregateRepository {
    /// Replace the rollup row for (user, date)
    async fn upsert(&self, aggregate: &DailyAggregate) -> Result<()>;

    /// Remove the rollup row for a date with no remaining records
    async fn delete(&self, user_id: &str, date: NaiveDate) -> Result<()>;

    /// Get the rollup row for (user, date)
    async fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyAggregate>>;
}

/// libSQL implementation of `AggregateRepository`
pub struct LibsqlAggregateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibsqlAggregateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_aggregate(row: &libsql::Row) -> Result<DailyAggregate> {
        let local_date: String = row.get(1)?;
        Ok(DailyAggregate {
            user_id: row.get(0)?,
            local_date: local_date
                .parse()
                .map_err(|_| Error::Database(format!("invalid local date: {local_date}")))?,
            run_count: row.get(2)?,
            total_distance_m: row.get(3)?,
            total_duration_secs: row.get(4)?,
            avg_pace_secs_per_km: row.get(5)?,
            longest_distance_m: row.get(6)?,
            fastest_pace_secs_per_km: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl AggregateRepository for LibsqlAggregateRepository<'_> {
    async fn upsert(&self, aggregate: &DailyAggregate) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO daily_aggregates (user_id, local_date, run_count, total_distance_m,
                 total_duration_secs, avg_pace_secs_per_km, longest_distance_m,
                 fastest_pace_secs_per_km, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (user_id, local_date) DO UPDATE SET
                   run_count = excluded.run_count,
                   total_distance_m = excluded.total_distance_m,
                   total_duration_secs = excluded.total_duration_secs,
                   avg_pace_secs_per_km = excluded.avg_pace_secs_per_km,
                   longest_distance_m = excluded.longest_distance_m,
                   fastest_pace_secs_per_km = excluded.fastest_pace_secs_per_km,
                   updated_at = excluded.updated_at",
                params![
                    aggregate.user_id.clone(),
                    aggregate.local_date.to_string(),
                    aggregate.run_count,
                    aggregate.total_distance_m,
                    aggregate.total_duration_secs,
                    aggregate.avg_pace_secs_per_km,
                    aggregate.longest_distance_m,
                    aggregate.fastest_pace_secs_per_km,
                    aggregate.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, date: NaiveDate) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM daily_aggregates WHERE user_id = ?1 AND local_date = ?2",
                params![user_id, date.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, local_date, run_count, total_distance_m, total_duration_secs,
                 avg_pace_secs_per_km, longest_distance_m, fastest_pace_secs_per_km, updated_at
                 FROM daily_aggregates WHERE user_id = ?1 AND local_date = ?2",
                params![user_id, date.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_aggregate(&row)?)),
            None => Ok(None),
        }
    }
}
