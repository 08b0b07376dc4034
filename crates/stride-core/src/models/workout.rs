//! Workout record model

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a workout record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkoutId(Uuid);

impl WorkoutId {
    /// Create a new unique workout ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for WorkoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkoutId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A canonical workout record owned by a single user.
///
/// Every read and write is scoped by `user_id`; no query may omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutRecord {
    /// Unique identifier
    pub id: WorkoutId,
    /// Owning user
    pub user_id: String,
    /// Calendar date of the activity in the client's local timezone
    pub local_date: NaiveDate,
    /// Activity start (Unix ms, UTC)
    pub started_at: i64,
    /// Activity end (Unix ms, UTC)
    pub ended_at: i64,
    /// Moving duration in seconds
    pub duration_secs: i64,
    /// Distance covered in meters
    pub distance_m: f64,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    pub weather: Option<String>,
    /// Device/app that produced the record (e.g. "garmin", "strava-export")
    pub source: String,
    /// Monotonically increasing version, starts at 1 on insert
    pub sync_version: i64,
    /// Client-supplied correlation id, if any
    pub client_id: Option<String>,
    /// Last time a sync batch touched this record (Unix ms)
    pub last_synced_at: i64,
    /// Row creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last mutation timestamp (Unix ms)
    pub updated_at: i64,
}

impl WorkoutRecord {
    /// Build a fresh record from an incoming submission. `sync_version` starts at 1.
    #[must_use]
    pub fn from_input(user_id: &str, input: &WorkoutInput, now_ms: i64) -> Self {
        Self {
            id: WorkoutId::new(),
            user_id: user_id.to_string(),
            local_date: input.local_date(),
            started_at: input.started_at_ms(),
            ended_at: input.ended_at_ms(),
            duration_secs: input.duration_seconds,
            distance_m: input.distance_meters,
            avg_heart_rate: input.avg_heart_rate,
            max_heart_rate: input.max_heart_rate,
            elevation_gain_m: input.elevation_gain_meters,
            weather: input.weather.clone(),
            source: input.source.clone(),
            sync_version: 1,
            client_id: input.client_id.clone(),
            last_synced_at: now_ms,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Overwrite the mutable fields from an incoming submission and bump the version.
    pub fn apply_input(&mut self, input: &WorkoutInput, now_ms: i64) {
        self.local_date = input.local_date();
        self.started_at = input.started_at_ms();
        self.ended_at = input.ended_at_ms();
        self.duration_secs = input.duration_seconds;
        self.distance_m = input.distance_meters;
        self.avg_heart_rate = input.avg_heart_rate;
        self.max_heart_rate = input.max_heart_rate;
        self.elevation_gain_m = input.elevation_gain_meters;
        self.weather = input.weather.clone();
        self.source = input.source.clone();
        if input.client_id.is_some() {
            self.client_id = input.client_id.clone();
        }
        self.sync_version += 1;
        self.last_synced_at = now_ms;
        self.updated_at = now_ms;
    }

    /// Pace in seconds per kilometer, or `None` for zero-distance activities
    #[must_use]
    pub fn pace_secs_per_km(&self) -> Option<f64> {
        if self.distance_m <= 0.0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(self.duration_secs as f64 / (self.distance_m / 1000.0))
    }
}

/// One workout as submitted by a syncing client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutInput {
    #[serde(default)]
    pub client_id: Option<String>,
    /// Start time with the client's local offset preserved
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub duration_seconds: i64,
    pub distance_meters: f64,
    #[serde(default)]
    pub avg_heart_rate: Option<f64>,
    #[serde(default)]
    pub max_heart_rate: Option<f64>,
    #[serde(default)]
    pub elevation_gain_meters: Option<f64>,
    #[serde(default)]
    pub weather: Option<String>,
    pub source: String,
}

impl WorkoutInput {
    #[must_use]
    pub fn started_at_ms(&self) -> i64 {
        self.start_time.timestamp_millis()
    }

    #[must_use]
    pub fn ended_at_ms(&self) -> i64 {
        self.end_time.timestamp_millis()
    }

    /// Calendar date of the activity as seen by the client.
    ///
    /// Uses the submitted offset, so a 23:30 local run stays on its local day
    /// even when the UTC instant falls on the next one.
    #[must_use]
    pub fn local_date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    /// Reject submissions the engine must never act on
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::InvalidInput("source must not be empty".to_string()));
        }
        if self.duration_seconds < 0 {
            return Err(Error::InvalidInput(
                "durationSeconds must not be negative".to_string(),
            ));
        }
        if !self.distance_meters.is_finite() || self.distance_meters < 0.0 {
            return Err(Error::InvalidInput(
                "distanceMeters must be a non-negative number".to_string(),
            ));
        }
        if self.ended_at_ms() < self.started_at_ms() {
            return Err(Error::InvalidInput(
                "endTime must not precede startTime".to_string(),
            ));
        }
        Ok(())
    }
}
