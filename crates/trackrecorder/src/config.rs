//! Configuration management for trackrecorder.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityThresholds;
use crate::backup::DEFAULT_BACKUP_KEY;
use crate::error::{Error, Result};
use crate::filter::DEFAULT_MIN_DISTANCE_METERS;
use crate::geolocation::GeolocationOptions;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "trackrecorder";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "backup.db";

/// Prefix of configuration environment variables.
const ENV_PREFIX: &str = "TRACKRECORDER_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TRACKRECORDER_`, sections
///    separated by `__`, e.g. `TRACKRECORDER_SYNC__INTERVAL_SECS=30`)
/// 2. TOML config file at `~/.config/trackrecorder/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Position filter configuration.
    pub filter: FilterConfig,
    /// Sync configuration.
    pub sync: SyncConfig,
    /// Activity detection configuration.
    pub activity: ActivityConfig,
    /// Geolocation acquisition configuration.
    pub geolocation: GeolocationConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Position filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples closer than this to the last admitted point are dropped.
    pub min_distance_meters: f64,
}

/// Sync-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic flushes while recording.
    pub interval_secs: u64,
    /// Pending points that trigger an immediate flush.
    pub max_points_per_batch: usize,
    /// Upper bound on a single upload, in seconds.
    pub flush_timeout_secs: u64,
    /// Upper bound on the flush issued when pausing, in seconds.
    pub pause_flush_timeout_secs: u64,
    /// First retry delay after a failed periodic flush, in seconds.
    pub backoff_base_secs: u64,
    /// Cap on the retry delay, in seconds.
    pub backoff_max_secs: u64,
}

/// Activity detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Number of recent speeds averaged.
    pub window_size: usize,
    /// Speed bucket bounds.
    pub thresholds: ActivityThresholds,
}

/// Geolocation acquisition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// Give up on a fix after this many seconds.
    pub timeout_secs: u64,
    /// Maximum age of a cached fix in milliseconds.
    pub maximum_age_ms: u64,
    /// Request the most accurate fix available.
    pub high_accuracy: bool,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/trackrecorder/backup.db`
    pub database_path: Option<PathBuf>,
    /// Slot the backup snapshot is written to.
    pub backup_key: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_distance_meters: DEFAULT_MIN_DISTANCE_METERS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            max_points_per_batch: 40,
            flush_timeout_secs: 30,
            pause_flush_timeout_secs: 5,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

impl SyncConfig {
    /// Get the periodic flush interval as a Duration.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the upload timeout as a Duration.
    #[must_use]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    /// Get the pause flush timeout as a Duration.
    #[must_use]
    pub fn pause_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.pause_flush_timeout_secs)
    }

    /// Delay before the next periodic flush after `failures` consecutive failures.
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        let secs = self
            .backoff_base_secs
            .saturating_mul(factor)
            .min(self.backoff_max_secs);
        Duration::from_secs(secs)
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            thresholds: ActivityThresholds::default(),
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            maximum_age_ms: 0,
            high_accuracy: true,
        }
    }
}

impl GeolocationConfig {
    /// Build the options handed to the geolocation source.
    #[must_use]
    pub fn to_options(&self) -> GeolocationOptions {
        GeolocationOptions {
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_secs(self.timeout_secs),
            maximum_age: Duration::from_millis(self.maximum_age_ms),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            backup_key: DEFAULT_BACKUP_KEY.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `TRACKRECORDER_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let distance = self.filter.min_distance_meters;
        if !distance.is_finite() || distance <= 0.0 {
            return Err(invalid(format!(
                "min_distance_meters must be a positive number, got {distance}"
            )));
        }

        if self.sync.interval_secs == 0 {
            return Err(invalid("interval_secs must be greater than 0"));
        }
        if self.sync.max_points_per_batch == 0 {
            return Err(invalid("max_points_per_batch must be greater than 0"));
        }
        if self.sync.flush_timeout_secs == 0 {
            return Err(invalid("flush_timeout_secs must be greater than 0"));
        }
        if self.sync.pause_flush_timeout_secs == 0 {
            return Err(invalid("pause_flush_timeout_secs must be greater than 0"));
        }
        if self.sync.backoff_base_secs > self.sync.backoff_max_secs {
            return Err(invalid(format!(
                "backoff_base_secs ({}) cannot be greater than backoff_max_secs ({})",
                self.sync.backoff_base_secs, self.sync.backoff_max_secs
            )));
        }

        if self.activity.window_size == 0 {
            return Err(invalid("window_size must be greater than 0"));
        }
        if !self.activity.thresholds.is_monotonic() {
            return Err(invalid(
                "activity thresholds must be positive and strictly increasing",
            ));
        }

        if self.geolocation.timeout_secs == 0 {
            return Err(invalid("geolocation timeout_secs must be greater than 0"));
        }

        if self.storage.backup_key.trim().is_empty() {
            return Err(invalid("backup_key cannot be empty"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!((config.filter.min_distance_meters - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.sync.interval_secs, 20);
        assert_eq!(config.activity.window_size, 10);
        assert!(config.geolocation.high_accuracy);
        assert_eq!(config.storage.backup_key, "gps_tracking_backup");
    }

    #[test]
    fn test_default_sync_config() {
        let sync = SyncConfig::default();

        assert_eq!(sync.max_points_per_batch, 40);
        assert_eq!(sync.flush_timeout_secs, 30);
        assert_eq!(sync.pause_flush_timeout_secs, 5);
        assert_eq!(sync.backoff_base_secs, 5);
        assert_eq!(sync.backoff_max_secs, 300);
    }

    #[test]
    fn test_sync_durations() {
        let sync = SyncConfig::default();

        assert_eq!(sync.interval(), Duration::from_secs(20));
        assert_eq!(sync.flush_timeout(), Duration::from_secs(30));
        assert_eq!(sync.pause_flush_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        let sync = SyncConfig::default();

        assert_eq!(sync.backoff_delay(0), Duration::ZERO);
        assert_eq!(sync.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(sync.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(sync.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(sync.backoff_delay(7), Duration::from_secs(300));
        assert_eq!(sync.backoff_delay(200), Duration::from_secs(300));
    }

    #[test]
    fn test_geolocation_options() {
        let options = GeolocationConfig::default().to_options();

        assert!(options.high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(15));
        assert_eq!(options.maximum_age, Duration::ZERO);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_non_positive_distance() {
        let mut config = Config::default();
        config.filter.min_distance_meters = 0.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("min_distance_meters"));

        config.filter.min_distance_meters = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.sync.interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("interval_secs"));
    }

    #[test]
    fn test_validate_zero_batch() {
        let mut config = Config::default();
        config.sync.max_points_per_batch = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_points_per_batch"));
    }

    #[test]
    fn test_validate_backoff_order() {
        let mut config = Config::default();
        config.sync.backoff_base_secs = 600;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("backoff_base_secs"));
    }

    #[test]
    fn test_validate_thresholds_must_increase() {
        let mut config = Config::default();
        config.activity.thresholds.hiking_max = 1.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("thresholds"));
    }

    #[test]
    fn test_validate_empty_backup_key() {
        let mut config = Config::default();
        config.storage.backup_key = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("backup_key"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("backup.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("trackrecorder"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_default_data_dir() {
        let path = Config::default_data_dir();
        assert!(path.to_string_lossy().contains("trackrecorder"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_toml_overrides() {
        let path = std::env::temp_dir().join(format!(
            "trackrecorder_config_test_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[sync]\ninterval_secs = 45\n\n[activity.thresholds]\nbiking_max = 9.0\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.sync.interval_secs, 45);
        assert_eq!(config.sync.max_points_per_batch, 40);
        assert!((config.activity.thresholds.biking_max - 9.0).abs() < f64::EPSILON);
        assert!((config.activity.thresholds.walking_max - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!(
            "trackrecorder_config_invalid_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[sync]\nmax_points_per_batch = 0\n").unwrap();

        let result = Config::load_from(Some(path.clone()));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_sync_config_deserialize() {
        let json = r#"{"interval_secs": 10, "backoff_max_secs": 60}"#;
        let sync: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(sync.interval_secs, 10);
        assert_eq!(sync.backoff_max_secs, 60);
        assert_eq!(sync.max_points_per_batch, 40);
    }

    #[test]
    fn test_storage_config_serialize() {
        let storage = StorageConfig::default();
        let json = serde_json::to_string(&storage).unwrap();
        assert!(json.contains("backup_key"));
    }

    #[test]
    fn test_config_clone() {
        let config = Config::default();
        let cloned = config.clone();
        assert_eq!(config, cloned);
    }
}
