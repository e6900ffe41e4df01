//! Offline replay of recorded position logs.
//!
//! Runs raw samples through the same filter, activity detector and stats
//! aggregator the live engine uses. Handy for tuning the filter distance and
//! the activity thresholds against real logs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::activity::{ActivityClassification, ActivityDetector, ActivityThresholds};
use crate::error::Result;
use crate::filter::PositionFilter;
use crate::point::{RawPosition, TrackPoint};
use crate::stats::{compute_stats, TrackStats};

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    /// Samples read.
    pub samples: usize,
    /// Samples admitted as points.
    pub admitted: usize,
    /// Samples dropped by the filter.
    pub rejected: usize,
    /// Stats over the admitted points.
    pub stats: TrackStats,
    /// Classification after the last sample.
    pub final_activity: ActivityClassification,
    /// Admitted points per classification in effect after each point.
    pub activity_counts: BTreeMap<String, usize>,
    /// The admitted points.
    #[serde(skip)]
    pub points: Vec<TrackPoint>,
}

/// Replay `positions` in order.
#[must_use]
pub fn replay(
    positions: &[RawPosition],
    min_distance_meters: f64,
    window_size: usize,
    thresholds: ActivityThresholds,
) -> ReplaySummary {
    let mut filter = PositionFilter::new(min_distance_meters);
    let mut detector = ActivityDetector::new(window_size, thresholds);
    let mut points = Vec::new();
    let mut activity_counts = BTreeMap::new();

    for raw in positions {
        let Some(point) = filter.admit(raw) else {
            continue;
        };
        let activity = detector.add_speed(point.speed_mps);
        *activity_counts
            .entry(activity.activity.to_string())
            .or_insert(0) += 1;
        points.push(point);
    }

    let stats = compute_stats(&points);
    debug!(
        min_distance = filter.min_distance_meters(),
        samples = positions.len(),
        admitted = points.len(),
        "replay complete"
    );

    ReplaySummary {
        samples: positions.len(),
        admitted: points.len(),
        rejected: positions.len() - points.len(),
        stats,
        final_activity: detector.current(),
        activity_counts,
        points,
    }
}

/// Read a JSON array of raw positions.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a position array.
pub fn load_positions(path: &Path) -> Result<Vec<RawPosition>> {
    let json = std::fs::read_to_string(path)?;
    let positions = serde_json::from_str(&json)?;
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityType;
    use chrono::{Duration, TimeZone, Utc};

    /// Roughly 11.1 m per 0.0001 degree of latitude.
    fn walk(count: i64, step_deg: f64, speed: f64) -> Vec<RawPosition> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                RawPosition::new(45.0 + step_deg * i as f64, 7.0, start + Duration::seconds(i * 10))
                    .with_speed(speed)
            })
            .collect()
    }

    #[test]
    fn test_replay_admits_spaced_samples() {
        let positions = walk(5, 0.0001, 1.2);
        let summary = replay(&positions, 5.0, 10, ActivityThresholds::default());

        assert_eq!(summary.samples, 5);
        assert_eq!(summary.admitted, 5);
        assert_eq!(summary.rejected, 0);
        assert!(summary.stats.total_distance_meters > 40.0);
        assert_eq!(summary.final_activity.activity, ActivityType::Walking);
        assert_eq!(summary.activity_counts.get("walking"), Some(&5));
    }

    #[test]
    fn test_replay_drops_jitter() {
        let positions = walk(5, 0.000_001, 0.0);
        let summary = replay(&positions, 5.0, 10, ActivityThresholds::default());

        assert_eq!(summary.admitted, 1);
        assert_eq!(summary.rejected, 4);
        assert!(summary.stats.total_distance_meters.abs() < f64::EPSILON);
    }

    #[test]
    fn test_replay_empty() {
        let summary = replay(&[], 5.0, 10, ActivityThresholds::default());
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.final_activity, ActivityClassification::unknown());
        assert!(summary.activity_counts.is_empty());
    }

    #[test]
    fn test_load_positions_from_file() {
        let path = std::env::temp_dir().join(format!(
            "trackrecorder_replay_test_{}.json",
            std::process::id()
        ));
        let positions = walk(3, 0.0001, 1.0);
        std::fs::write(&path, serde_json::to_string(&positions).unwrap()).unwrap();

        let loaded = load_positions(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, positions);
    }

    #[test]
    fn test_load_positions_rejects_garbage() {
        let path = std::env::temp_dir().join(format!(
            "trackrecorder_replay_garbage_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{\"latitude\": 1}").unwrap();

        let result = load_positions(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(crate::Error::Json(_))));
    }

    #[test]
    fn test_load_positions_missing_file() {
        let result = load_positions(Path::new("/nonexistent/positions.json"));
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
