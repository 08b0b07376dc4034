//! Daily aggregate model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-day rollup of a user's workouts.
///
/// Always reconstructable from scratch out of the full record set for
/// (user, date); the recalculator never patches it incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    pub user_id: String,
    pub local_date: NaiveDate,
    pub run_count: i64,
    pub total_distance_m: f64,
    pub total_duration_secs: i64,
    /// Distance-weighted average pace: total duration over total kilometers
    pub avg_pace_secs_per_km: Option<f64>,
    pub longest_distance_m: f64,
    pub fastest_pace_secs_per_km: Option<f64>,
    /// Recalculation timestamp (Unix ms)
    pub updated_at: i64,
}
