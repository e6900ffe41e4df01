//! Core position types for trackrecorder.
//!
//! This module defines the raw samples delivered by a geolocation source and
//! the admitted, sequenced points that make up a track.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every distance computation, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A position sample as reported by the geolocation source.
///
/// Raw samples are ephemeral: they are either admitted into a [`TrackPoint`]
/// or dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosition {
    /// Latitude in decimal degrees.
    pub latitude: f64,

    /// Longitude in decimal degrees.
    pub longitude: f64,

    /// Altitude above sea level in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    /// Horizontal accuracy radius in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    /// Vertical accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,

    /// Ground speed in meters per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Direction of travel in degrees clockwise from true north.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl RawPosition {
    /// Create a sample with only coordinates and a timestamp.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            altitude_accuracy: None,
            speed: None,
            heading: None,
            timestamp,
        }
    }

    /// Set the altitude.
    #[must_use]
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Set the reported speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Check that the coordinates are finite and within WGS84 bounds.
    #[must_use]
    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// An admitted GPS sample with its position in the track.
///
/// Track points are immutable once created. The remote store deduplicates
/// uploads by `(track id, sequence_num)`, which makes retried uploads safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Latitude in decimal degrees.
    pub latitude: f64,

    /// Longitude in decimal degrees.
    pub longitude: f64,

    /// Altitude in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,

    /// Horizontal accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,

    /// Vertical accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy_m: Option<f64>,

    /// Reported ground speed in meters per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,

    /// Direction of travel in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// Position of this point in the track, strictly increasing from 0.
    pub sequence_num: u64,

    /// When the underlying sample was taken.
    pub recorded_at: DateTime<Utc>,
}

impl TrackPoint {
    /// Build a point from a raw sample and its assigned sequence number.
    #[must_use]
    pub fn from_raw(raw: &RawPosition, sequence_num: u64) -> Self {
        Self {
            latitude: raw.latitude,
            longitude: raw.longitude,
            altitude_m: raw.altitude,
            accuracy_m: raw.accuracy,
            altitude_accuracy_m: raw.altitude_accuracy,
            speed_mps: raw.speed,
            heading: raw.heading,
            sequence_num,
            recorded_at: raw.timestamp,
        }
    }

    /// Great-circle distance to another point in meters.
    #[must_use]
    pub fn distance_to(&self, other: &TrackPoint) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Seconds elapsed since `earlier` was recorded (negative if out of order).
    #[must_use]
    pub fn seconds_since(&self, earlier: &TrackPoint) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let millis = (self.recorded_at - earlier.recorded_at).num_milliseconds() as f64;
        millis / 1000.0
    }
}

/// Haversine great-circle distance between two coordinates, in meters.
#[must_use]
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_haversine_zero_distance() {
        assert!(haversine_distance(46.5, 7.9, 46.5, 7.9).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        // One degree of latitude on a 6 371 km sphere
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        let expected = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = haversine_distance(51.5074, -0.1278, 48.8566, 2.3522);
        let b = haversine_distance(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((a - b).abs() < 1e-6);
        // London to Paris is roughly 343 km
        assert!((a - 343_500.0).abs() < 2_000.0, "got {a}");
    }

    #[test]
    fn test_from_raw_copies_fields() {
        let raw = RawPosition {
            accuracy: Some(4.0),
            altitude_accuracy: Some(8.0),
            heading: Some(90.0),
            ..RawPosition::new(46.0, 7.0, t0())
                .with_altitude(1200.0)
                .with_speed(1.4)
        };
        let point = TrackPoint::from_raw(&raw, 7);

        assert_eq!(point.sequence_num, 7);
        assert_eq!(point.altitude_m, Some(1200.0));
        assert_eq!(point.accuracy_m, Some(4.0));
        assert_eq!(point.altitude_accuracy_m, Some(8.0));
        assert_eq!(point.speed_mps, Some(1.4));
        assert_eq!(point.heading, Some(90.0));
        assert_eq!(point.recorded_at, t0());
    }

    #[test]
    fn test_seconds_since() {
        let a = TrackPoint::from_raw(&RawPosition::new(0.0, 0.0, t0()), 0);
        let b = TrackPoint::from_raw(
            &RawPosition::new(0.0, 0.0, t0() + Duration::milliseconds(2500)),
            1,
        );
        assert!((b.seconds_since(&a) - 2.5).abs() < f64::EPSILON);
        assert!((a.seconds_since(&b) + 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_valid_coordinates() {
        assert!(RawPosition::new(90.0, -180.0, t0()).has_valid_coordinates());
        assert!(!RawPosition::new(90.5, 0.0, t0()).has_valid_coordinates());
        assert!(!RawPosition::new(0.0, 181.0, t0()).has_valid_coordinates());
        assert!(!RawPosition::new(f64::NAN, 0.0, t0()).has_valid_coordinates());
    }

    #[test]
    fn test_track_point_serialization_skips_missing_fields() {
        let point = TrackPoint::from_raw(&RawPosition::new(1.0, 2.0, t0()), 0);
        let json = serde_json::to_string(&point).unwrap();
        assert!(!json.contains("altitude_m"));
        assert!(json.contains("sequence_num"));

        let back: TrackPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_raw_position_deserializes_without_optionals() {
        let json = r#"{"latitude": 1.5, "longitude": 2.5, "timestamp": "2024-06-01T08:00:00Z"}"#;
        let raw: RawPosition = serde_json::from_str(json).unwrap();
        assert_eq!(raw, RawPosition::new(1.5, 2.5, t0()));
    }
}
