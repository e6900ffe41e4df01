//! Position filter and sequencer.
//!
//! Raw geolocation streams emit near-duplicate, jittery samples. The filter
//! drops any sample that lies closer than a minimum distance to the last
//! admitted point and numbers the survivors.

use tracing::trace;

use crate::point::{RawPosition, TrackPoint};

/// Default minimum distance between admitted points, in meters.
pub const DEFAULT_MIN_DISTANCE_METERS: f64 = 5.0;

/// Distance gate that admits raw samples and assigns sequence numbers.
///
/// A candidate at exactly `min_distance_meters` from the last admitted point
/// is admitted; only strictly closer candidates are rejected.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    min_distance_meters: f64,
    last_admitted: Option<TrackPoint>,
    next_sequence_num: u64,
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DISTANCE_METERS)
    }
}

impl PositionFilter {
    /// Create a filter with the given minimum distance.
    #[must_use]
    pub fn new(min_distance_meters: f64) -> Self {
        Self {
            min_distance_meters,
            last_admitted: None,
            next_sequence_num: 0,
        }
    }

    /// The configured minimum distance in meters.
    #[must_use]
    pub fn min_distance_meters(&self) -> f64 {
        self.min_distance_meters
    }

    /// The most recently admitted point, if any.
    #[must_use]
    pub fn last_admitted(&self) -> Option<&TrackPoint> {
        self.last_admitted.as_ref()
    }

    /// The sequence number the next admitted point will receive.
    #[must_use]
    pub fn next_sequence_num(&self) -> u64 {
        self.next_sequence_num
    }

    /// Admit or reject a raw sample.
    ///
    /// Returns the new point on acceptance. Samples with invalid coordinates
    /// are always rejected.
    pub fn admit(&mut self, raw: &RawPosition) -> Option<TrackPoint> {
        if !raw.has_valid_coordinates() {
            trace!(
                latitude = raw.latitude,
                longitude = raw.longitude,
                "rejecting sample with invalid coordinates"
            );
            return None;
        }

        let candidate = TrackPoint::from_raw(raw, self.next_sequence_num);

        if let Some(last) = &self.last_admitted {
            let distance = last.distance_to(&candidate);
            if distance < self.min_distance_meters {
                trace!(distance, "rejecting sample below minimum distance");
                return None;
            }
        }

        self.next_sequence_num += 1;
        self.last_admitted = Some(candidate.clone());
        Some(candidate)
    }

    /// Forget the last admitted point and restart numbering at 0.
    pub fn reset(&mut self) {
        self.last_admitted = None;
        self.next_sequence_num = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::EARTH_RADIUS_METERS;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    /// Latitude offset (degrees) that is `meters` north of the equator origin.
    fn north(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_METERS).to_degrees()
    }

    #[test]
    fn test_first_sample_always_admitted() {
        let mut filter = PositionFilter::new(5.0);
        let point = filter.admit(&RawPosition::new(0.0, 0.0, t(0))).unwrap();
        assert_eq!(point.sequence_num, 0);
        assert_eq!(filter.next_sequence_num(), 1);
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let mut filter = PositionFilter::new(5.0);
        let mut last = None;
        for i in 0..20_i32 {
            let raw = RawPosition::new(north(10.0 * f64::from(i)), 0.0, t(i64::from(i)));
            let point = filter.admit(&raw).unwrap();
            if let Some(prev) = last {
                assert!(point.sequence_num > prev);
            }
            last = Some(point.sequence_num);
        }
        assert_eq!(last, Some(19));
    }

    #[test]
    fn test_rejects_jitter_below_threshold() {
        let mut filter = PositionFilter::new(5.0);
        filter.admit(&RawPosition::new(0.0, 0.0, t(0))).unwrap();

        assert!(filter.admit(&RawPosition::new(north(4.9), 0.0, t(1))).is_none());
        assert!(filter.admit(&RawPosition::new(north(1.0), 0.0, t(2))).is_none());
        // Rejected samples do not consume sequence numbers
        assert_eq!(filter.next_sequence_num(), 1);
    }

    #[test]
    fn test_exact_threshold_is_admitted() {
        let origin = RawPosition::new(0.0, 0.0, t(0));
        let raw = RawPosition::new(north(5.0), 0.0, t(1));
        let distance =
            TrackPoint::from_raw(&origin, 0).distance_to(&TrackPoint::from_raw(&raw, 1));
        assert!((distance - 5.0).abs() < 1e-9, "got {distance}");

        // Threshold equal to the computed distance: admitted
        let mut filter = PositionFilter::new(distance);
        filter.admit(&origin).unwrap();
        assert_eq!(filter.admit(&raw).map(|p| p.sequence_num), Some(1));

        // Any threshold above it: rejected
        let mut filter = PositionFilter::new(distance + 1e-9);
        filter.admit(&origin).unwrap();
        assert!(filter.admit(&raw).is_none());
    }

    #[test]
    fn test_distance_measured_from_last_admitted() {
        let mut filter = PositionFilter::new(5.0);
        filter.admit(&RawPosition::new(0.0, 0.0, t(0))).unwrap();
        // 3 m steps: the second one is 6 m from the last admitted point
        assert!(filter.admit(&RawPosition::new(north(3.0), 0.0, t(1))).is_none());
        assert!(filter.admit(&RawPosition::new(north(6.0), 0.0, t(2))).is_some());
    }

    #[test]
    fn test_rejects_invalid_coordinates() {
        let mut filter = PositionFilter::new(5.0);
        assert!(filter.admit(&RawPosition::new(f64::NAN, 0.0, t(0))).is_none());
        assert!(filter.admit(&RawPosition::new(95.0, 0.0, t(0))).is_none());
        assert!(filter.last_admitted().is_none());
    }

    #[test]
    fn test_recorded_at_is_sample_time() {
        let mut filter = PositionFilter::default();
        let point = filter.admit(&RawPosition::new(0.0, 0.0, t(42))).unwrap();
        assert_eq!(point.recorded_at, t(42));
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut filter = PositionFilter::new(5.0);
        filter.admit(&RawPosition::new(0.0, 0.0, t(0))).unwrap();
        filter.admit(&RawPosition::new(north(10.0), 0.0, t(1))).unwrap();

        filter.reset();
        assert!(filter.last_admitted().is_none());
        let point = filter.admit(&RawPosition::new(north(10.0), 0.0, t(2))).unwrap();
        assert_eq!(point.sequence_num, 0);
    }

    #[test]
    fn test_independent_filters_do_not_share_counters() {
        let mut a = PositionFilter::new(5.0);
        let mut b = PositionFilter::new(5.0);
        a.admit(&RawPosition::new(0.0, 0.0, t(0))).unwrap();
        a.admit(&RawPosition::new(north(10.0), 0.0, t(1))).unwrap();

        let first_b = b.admit(&RawPosition::new(0.0, 0.0, t(0))).unwrap();
        assert_eq!(first_b.sequence_num, 0);
    }
}
