//! Duplicate matcher
//!
//! Wearable-derived start times drift by tens of seconds across devices and
//! export tools, so exact-timestamp matching would duplicate every retried
//! or re-exported activity. Instead we look for the closest existing record
//! inside a tolerance window around the submitted start time.

use std::time::Duration;

use crate::db::WorkoutRepository;
use crate::error::Result;
use crate::models::WorkoutRecord;

/// Default window half-width around the submitted start time
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(60);

/// Find the closest existing record whose start time falls within
/// `[started_at - tolerance, started_at + tolerance]`, both ends inclusive.
///
/// Equidistant candidates are broken deterministically by lowest record id.
/// Read-only; no side effects.
pub async fn find_duplicate<R: WorkoutRepository>(
    repo: &R,
    user_id: &str,
    started_at_ms: i64,
    tolerance: Duration,
) -> Result<Option<WorkoutRecord>> {
    let tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
    let candidates = repo
        .find_started_between(
            user_id,
            started_at_ms.saturating_sub(tolerance_ms),
            started_at_ms.saturating_add(tolerance_ms),
        )
        .await?;

    Ok(candidates
        .into_iter()
        .min_by_key(|record| ((record.started_at - started_at_ms).abs(), record.id)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{Database, LibsqlWorkoutRepository};
    use crate::models::{WorkoutInput, WorkoutRecord};

    fn record_at(user_id: &str, start: &str) -> WorkoutRecord {
        let start_time: chrono::DateTime<chrono::FixedOffset> = start.parse().unwrap();
        let input = WorkoutInput {
            client_id: None,
            start_time,
            end_time: start_time + chrono::Duration::minutes(30),
            duration_seconds: 1800,
            distance_meters: 5000.0,
            avg_heart_rate: None,
            max_heart_rate: None,
            elevation_gain_meters: None,
            weather: None,
            source: "garmin".to_string(),
        };
        WorkoutRecord::from_input(user_id, &input, 1_000)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_match_outside_window() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibsqlWorkoutRepository::new(db.connection());

        let existing = record_at("user-1", "2025-01-15T08:00:00Z");
        repo.insert(&existing).await.unwrap();

        // 61 seconds away with a 60 second tolerance
        let probe = existing.started_at + 61_000;
        let found = find_duplicate(&repo, "user-1", probe, DEFAULT_TOLERANCE)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_boundary_is_inclusive() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibsqlWorkoutRepository::new(db.connection());

        let existing = record_at("user-1", "2025-01-15T08:00:00Z");
        repo.insert(&existing).await.unwrap();

        // Exactly 60 seconds away still matches
        let probe = existing.started_at + 60_000;
        let found = find_duplicate(&repo, "user-1", probe, DEFAULT_TOLERANCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, existing.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_picks_closest_of_several() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibsqlWorkoutRepository::new(db.connection());

        let near = record_at("user-1", "2025-01-15T08:00:10Z");
        let far = record_at("user-1", "2025-01-15T08:00:50Z");
        repo.insert(&near).await.unwrap();
        repo.insert(&far).await.unwrap();

        let probe = record_at("user-1", "2025-01-15T08:00:00Z").started_at;
        let found = find_duplicate(&repo, "user-1", probe, DEFAULT_TOLERANCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, near.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_equidistant_tie_breaks_on_lowest_id() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibsqlWorkoutRepository::new(db.connection());

        // 30s before and 30s after the probe
        let before = record_at("user-1", "2025-01-15T07:59:30Z");
        let after = record_at("user-1", "2025-01-15T08:00:30Z");
        repo.insert(&before).await.unwrap();
        repo.insert(&after).await.unwrap();

        let probe = record_at("user-1", "2025-01-15T08:00:00Z").started_at;
        let found = find_duplicate(&repo, "user-1", probe, DEFAULT_TOLERANCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, before.id.min(after.id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_never_matches_another_users_record() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibsqlWorkoutRepository::new(db.connection());

        let existing = record_at("user-1", "2025-01-15T08:00:00Z");
        repo.insert(&existing).await.unwrap();

        let found = find_duplicate(&repo, "user-2", existing.started_at, DEFAULT_TOLERANCE)
            .await
            .unwrap();
        assert_eq!(found, None);
    }
}
