//! Track statistics derived from an ordered point list.
//!
//! [`compute_stats`] is a pure function of its input. Crash recovery replays
//! it over restored points, so identical input must always give identical
//! output. Optional fields that are missing are left out of the aggregates
//! rather than treated as zero.
//!
//! Speed policy: a point's effective speed is its reported `speed_mps` when
//! present, otherwise the distance from the previous point divided by the time
//! between them (when that time is positive). The average speed is total
//! distance over duration; when the duration is zero it falls back to the mean
//! of the effective speeds.

use serde::{Deserialize, Serialize};

use crate::point::TrackPoint;

/// Geographic bounding box of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Southernmost latitude.
    pub min_lat: f64,
    /// Northernmost latitude.
    pub max_lat: f64,
    /// Westernmost longitude.
    pub min_lng: f64,
    /// Easternmost longitude.
    pub max_lng: f64,
}

impl Bounds {
    fn around(point: &TrackPoint) -> Self {
        Self {
            min_lat: point.latitude,
            max_lat: point.latitude,
            min_lng: point.longitude,
            max_lng: point.longitude,
        }
    }

    fn extend(&mut self, point: &TrackPoint) {
        self.min_lat = self.min_lat.min(point.latitude);
        self.max_lat = self.max_lat.max(point.latitude);
        self.min_lng = self.min_lng.min(point.longitude);
        self.max_lng = self.max_lng.max(point.longitude);
    }
}

/// Aggregate statistics of a track.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackStats {
    /// Sum of the distances between consecutive points.
    pub total_distance_meters: f64,
    /// Time between the first and the last point.
    pub duration_seconds: f64,
    /// Sum of climbs between consecutive points with altitude.
    pub elevation_gain_m: f64,
    /// Sum of descents between consecutive points with altitude (positive).
    pub elevation_loss_m: f64,
    /// Average speed over the track.
    pub avg_speed_mps: f64,
    /// Highest effective speed.
    pub max_speed_mps: f64,
    /// Lowest recorded altitude.
    pub min_elevation_m: Option<f64>,
    /// Highest recorded altitude.
    pub max_elevation_m: Option<f64>,
    /// Bounding box, absent for an empty track.
    pub bounds: Option<Bounds>,
}

/// Compute statistics for an ordered list of points.
#[must_use]
pub fn compute_stats(points: &[TrackPoint]) -> TrackStats {
    let Some(first) = points.first() else {
        return TrackStats::default();
    };

    let mut stats = TrackStats::default();
    let mut bounds = Bounds::around(first);
    let mut speed_sum = 0.0;
    let mut speed_count = 0_u32;
    let mut last_altitude: Option<f64> = None;
    let mut previous: Option<&TrackPoint> = None;

    for point in points {
        bounds.extend(point);

        let segment = previous.map(|prev| (point.distance_to(prev), point.seconds_since(prev)));
        if let Some((distance, _)) = segment {
            stats.total_distance_meters += distance;
        }

        let effective_speed = point.speed_mps.filter(|s| s.is_finite()).or_else(|| {
            segment.and_then(|(distance, secs)| (secs > 0.0).then(|| distance / secs))
        });
        if let Some(speed) = effective_speed {
            stats.max_speed_mps = stats.max_speed_mps.max(speed);
            speed_sum += speed;
            speed_count += 1;
        }

        if let Some(altitude) = point.altitude_m.filter(|a| a.is_finite()) {
            if let Some(prev_altitude) = last_altitude {
                let delta = altitude - prev_altitude;
                if delta > 0.0 {
                    stats.elevation_gain_m += delta;
                } else {
                    stats.elevation_loss_m -= delta;
                }
            }
            stats.min_elevation_m =
                Some(stats.min_elevation_m.map_or(altitude, |m| m.min(altitude)));
            stats.max_elevation_m =
                Some(stats.max_elevation_m.map_or(altitude, |m| m.max(altitude)));
            last_altitude = Some(altitude);
        }

        previous = Some(point);
    }

    if let Some(last) = points.last() {
        stats.duration_seconds = last.seconds_since(first).max(0.0);
    }

    stats.avg_speed_mps = if stats.duration_seconds > 0.0 {
        stats.total_distance_meters / stats.duration_seconds
    } else if speed_count > 0 {
        speed_sum / f64::from(speed_count)
    } else {
        0.0
    };
    stats.bounds = Some(bounds);

    stats
}
