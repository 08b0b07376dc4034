//! Aggregate recalculator
//!
//! Rollups are always rebuilt from the full record set for (user, date),
//! never patched incrementally, so they self-heal after partial failures.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::db::{AggregateRepository, WorkoutRepository};
use crate::error::Result;
use crate::models::{DailyAggregate, WorkoutRecord};

/// Build the rollup for one date from its complete record set.
///
/// Returns `None` when no records remain, which tells the caller to delete
/// the row instead.
#[must_use]
pub fn compute_aggregate(
    user_id: &str,
    date: NaiveDate,
    records: &[WorkoutRecord],
    now_ms: i64,
) -> Option<DailyAggregate> {
    if records.is_empty() {
        return None;
    }

    let total_distance_m: f64 = records.iter().map(|r| r.distance_m).sum();
    let total_duration_secs: i64 = records.iter().map(|r| r.duration_secs).sum();

    // Distance-weighted, not a naive mean of per-run paces: a slow 1k jog
    // should not drag down the average of a fast 20k the same way.
    #[allow(clippy::cast_precision_loss)]
    let avg_pace_secs_per_km = if total_distance_m > 0.0 {
        Some(total_duration_secs as f64 / (total_distance_m / 1000.0))
    } else {
        None
    };

    let longest_distance_m = records.iter().map(|r| r.distance_m).fold(0.0, f64::max);
    let fastest_pace_secs_per_km = records
        .iter()
        .filter_map(WorkoutRecord::pace_secs_per_km)
        .fold(None, |fastest: Option<f64>, pace| {
            Some(fastest.map_or(pace, |f| f.min(pace)))
        });

    Some(DailyAggregate {
        user_id: user_id.to_string(),
        local_date: date,
        run_count: i64::try_from(records.len()).unwrap_or(i64::MAX),
        total_distance_m,
        total_duration_secs,
        avg_pace_secs_per_km,
        longest_distance_m,
        fastest_pace_secs_per_km,
        updated_at: now_ms,
    })
}

/// Recompute the rollup row for every affected date, exactly once per date.
///
/// Must run after all record writes for the batch have completed.
pub async fn recalculate<W, A>(
    workouts: &W,
    aggregates: &A,
    user_id: &str,
    dates: &BTreeSet<NaiveDate>,
    now_ms: i64,
) -> Result<()>
where
    W: WorkoutRepository,
    A: AggregateRepository,
{
    for &date in dates {
        let records = workouts.list_for_date(user_id, date).await?;
        match compute_aggregate(user_id, date, &records, now_ms) {
            Some(aggregate) => aggregates.upsert(&aggregate).await?,
            None => aggregates.delete(user_id, date).await?,
        }
        tracing::debug!(
            date = %date,
            runs = records.len(),
            "Recalculated daily aggregate"
        );
    }
    Ok(())
}
