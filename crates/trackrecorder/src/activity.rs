//! Activity classification from recent speeds.
//!
//! The detector keeps a bounded window of the most recent speed readings and
//! maps their mean onto speed buckets. Nothing here is persisted; the
//! classification is superseded by every new sample.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Dominant travel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// Not moving.
    Stationary,
    /// Walking pace.
    Walking,
    /// Hiking pace.
    Hiking,
    /// Cycling pace.
    Biking,
    /// Motorized travel.
    Driving,
    /// Not enough data to decide.
    #[default]
    Unknown,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stationary => write!(f, "stationary"),
            Self::Walking => write!(f, "walking"),
            Self::Hiking => write!(f, "hiking"),
            Self::Biking => write!(f, "biking"),
            Self::Driving => write!(f, "driving"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A travel mode together with how sure the detector is about it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivityClassification {
    /// The detected travel mode.
    #[serde(rename = "type")]
    pub activity: ActivityType,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl ActivityClassification {
    /// The classification reported before any speed is known.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Upper bounds (exclusive, m/s) of each speed bucket.
///
/// Anything at or above `biking_max` is driving. Bounds must be strictly
/// increasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityThresholds {
    /// Below this the user is stationary.
    pub stationary_max: f64,
    /// Below this the user is walking.
    pub walking_max: f64,
    /// Below this the user is hiking.
    pub hiking_max: f64,
    /// Below this the user is biking.
    pub biking_max: f64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            stationary_max: 0.5,
            walking_max: 2.0,
            hiking_max: 3.0,
            biking_max: 7.0,
        }
    }
}

impl ActivityThresholds {
    /// Check the buckets are positive, finite and strictly increasing.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        let bounds = [
            self.stationary_max,
            self.walking_max,
            self.hiking_max,
            self.biking_max,
        ];
        bounds.iter().all(|b| b.is_finite() && *b > 0.0)
            && bounds.windows(2).all(|w| w[0] < w[1])
    }

    /// Map a smoothed speed onto a bucket.
    #[must_use]
    pub fn classify(&self, speed_mps: f64) -> ActivityType {
        if speed_mps < self.stationary_max {
            ActivityType::Stationary
        } else if speed_mps < self.walking_max {
            ActivityType::Walking
        } else if speed_mps < self.hiking_max {
            ActivityType::Hiking
        } else if speed_mps < self.biking_max {
            ActivityType::Biking
        } else {
            ActivityType::Driving
        }
    }
}

/// Below this mean speed the coefficient of variation is meaningless.
const LOW_SPEED_FLOOR: f64 = 0.1;

/// Rolling-window travel mode detector.
#[derive(Debug, Clone)]
pub struct ActivityDetector {
    window: VecDeque<f64>,
    window_size: usize,
    thresholds: ActivityThresholds,
    current: ActivityClassification,
}

impl ActivityDetector {
    /// Create a detector keeping up to `window_size` speeds.
    #[must_use]
    pub fn new(window_size: usize, thresholds: ActivityThresholds) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            thresholds,
            current: ActivityClassification::unknown(),
        }
    }

    /// Feed a speed reading and return the updated classification.
    ///
    /// `None`, negative and non-finite readings are ignored and the previous
    /// classification is returned unchanged.
    pub fn add_speed(&mut self, speed_mps: Option<f64>) -> ActivityClassification {
        let Some(speed) = speed_mps.filter(|s| s.is_finite() && *s >= 0.0) else {
            return self.current;
        };

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(speed);

        self.current = self.classify_window();
        self.current
    }

    /// The latest classification.
    #[must_use]
    pub fn current(&self) -> ActivityClassification {
        self.current
    }

    /// Number of speeds currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Clear the window; the classification returns to unknown.
    pub fn reset(&mut self) {
        self.window.clear();
        self.current = ActivityClassification::unknown();
    }

    #[allow(clippy::cast_precision_loss)]
    fn classify_window(&self) -> ActivityClassification {
        if self.window.is_empty() {
            return ActivityClassification::unknown();
        }

        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self.window.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        let spread = if mean < LOW_SPEED_FLOOR {
            std_dev
        } else {
            std_dev / mean
        };
        let fill = n / self.window_size as f64;
        let confidence = (fill / (1.0 + spread)).clamp(0.0, 1.0);

        ActivityClassification {
            activity: self.thresholds.classify(mean),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ActivityDetector {
        ActivityDetector::new(5, ActivityThresholds::default())
    }

    #[test]
    fn test_default_thresholds_are_monotonic() {
        assert!(ActivityThresholds::default().is_monotonic());
    }

    #[test]
    fn test_non_monotonic_thresholds_detected() {
        let thresholds = ActivityThresholds {
            hiking_max: 1.0,
            ..ActivityThresholds::default()
        };
        assert!(!thresholds.is_monotonic());
    }

    #[test]
    fn test_bucket_boundaries() {
        let t = ActivityThresholds::default();
        assert_eq!(t.classify(0.0), ActivityType::Stationary);
        assert_eq!(t.classify(0.49), ActivityType::Stationary);
        assert_eq!(t.classify(0.5), ActivityType::Walking);
        assert_eq!(t.classify(1.99), ActivityType::Walking);
        assert_eq!(t.classify(2.0), ActivityType::Hiking);
        assert_eq!(t.classify(3.0), ActivityType::Biking);
        assert_eq!(t.classify(6.99), ActivityType::Biking);
        assert_eq!(t.classify(7.0), ActivityType::Driving);
        assert_eq!(t.classify(40.0), ActivityType::Driving);
    }

    #[test]
    fn test_empty_detector_is_unknown() {
        let d = detector();
        assert_eq!(d.current().activity, ActivityType::Unknown);
        assert!(d.current().confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_undefined_speeds_are_ignored() {
        let mut d = detector();
        d.add_speed(Some(1.2));
        let before = d.current();

        assert_eq!(d.add_speed(None), before);
        assert_eq!(d.add_speed(Some(f64::NAN)), before);
        assert_eq!(d.add_speed(Some(-3.0)), before);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut d = detector();
        for _ in 0..5 {
            d.add_speed(Some(1.0));
        }
        // Five fast readings push out all the slow ones
        for _ in 0..5 {
            d.add_speed(Some(10.0));
        }
        assert_eq!(d.len(), 5);
        assert_eq!(d.current().activity, ActivityType::Driving);
    }

    #[test]
    fn test_steady_speed_has_full_confidence() {
        let mut d = detector();
        for _ in 0..5 {
            d.add_speed(Some(1.4));
        }
        let c = d.current();
        assert_eq!(c.activity, ActivityType::Walking);
        assert!((c.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_noisy_speed_lowers_confidence() {
        let mut steady = detector();
        let mut noisy = detector();
        for s in [4.0, 4.0, 4.0, 4.0, 4.0] {
            steady.add_speed(Some(s));
        }
        for s in [1.0, 7.0, 2.0, 6.0, 4.0] {
            noisy.add_speed(Some(s));
        }
        assert_eq!(noisy.current().activity, ActivityType::Biking);
        assert!(noisy.current().confidence < steady.current().confidence);
    }

    #[test]
    fn test_partial_window_scales_confidence() {
        let mut d = detector();
        d.add_speed(Some(1.0));
        assert!((d.current().confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut d = detector();
        d.add_speed(Some(5.0));
        d.reset();
        assert!(d.is_empty());
        assert_eq!(d.current(), ActivityClassification::unknown());
    }

    #[test]
    fn test_zero_window_size_is_clamped() {
        let mut d = ActivityDetector::new(0, ActivityThresholds::default());
        d.add_speed(Some(0.1));
        d.add_speed(Some(0.2));
        assert_eq!(d.len(), 1);
        assert_eq!(d.current().activity, ActivityType::Stationary);
    }

    #[test]
    fn test_classification_serializes_type_field() {
        let c = ActivityClassification {
            activity: ActivityType::Hiking,
            confidence: 0.5,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains(r#""type":"hiking""#));
    }
}
