//! Error types for trackrecorder.
//!
//! This module defines all error types used throughout the trackrecorder crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::geolocation::GeolocationError;
use crate::orchestrator::TrackingState;
use crate::remote::RemoteError;

/// The main error type for trackrecorder operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors ===
    /// A request was rejected before any remote call or state mutation.
    #[error("invalid request: {message}")]
    Validation {
        /// Description of what was invalid.
        message: String,
    },

    // === Lifecycle Errors ===
    /// The operation is not legal in the current tracking state.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        /// The rejected operation.
        operation: &'static str,
        /// The state the orchestrator was in.
        state: TrackingState,
    },

    /// The operation needs an active track but none is bound.
    #[error("no active track")]
    NoActiveTrack,

    // === Remote Errors ===
    /// The remote store refused to allocate a track.
    #[error("failed to create track: {0}")]
    TrackCreate(#[source] RemoteError),

    /// The remote store failed to finalize the track.
    #[error("failed to finalize track {track_id}: {source}")]
    TrackFinalize {
        /// The track being finalized.
        track_id: String,
        /// The underlying error.
        #[source]
        source: RemoteError,
    },

    /// Uploading pending points failed.
    #[error("failed to upload {pending} pending points: {source}")]
    Sync {
        /// Number of points that remain pending.
        pending: usize,
        /// The underlying error.
        #[source]
        source: RemoteError,
    },

    // === Sensor Errors ===
    /// The geolocation source reported a failure.
    #[error("geolocation error: {0}")]
    Geolocation(#[from] GeolocationError),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for trackrecorder operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// The remote error behind this error, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::TrackCreate(source)
            | Self::TrackFinalize { source, .. }
            | Self::Sync { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            _ => self.remote().is_some_and(RemoteError::is_retryable),
        }
    }

    /// Check if this error means the credential was refused.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        self.remote().is_some_and(RemoteError::is_unauthorized)
    }

    /// Check if this error is a rejected state transition.
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::NoActiveTrack;
        assert_eq!(err.to_string(), "no active track");

        let err = Error::validation("missing credential");
        assert_eq!(err.to_string(), "invalid request: missing credential");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            operation: "pause",
            state: TrackingState::Idle,
        };
        assert_eq!(err.to_string(), "cannot pause while idle");
        assert!(err.is_invalid_transition());
    }

    #[test]
    fn test_sync_error_is_retryable() {
        let err = Error::Sync {
            pending: 3,
            source: RemoteError::new(RemoteErrorKind::Network, "connection reset"),
        };
        assert!(err.is_retryable());
        assert!(!err.is_auth_error());
        assert!(err.to_string().contains("3 pending points"));
    }

    #[test]
    fn test_unauthorized_is_not_retryable() {
        let err = Error::TrackFinalize {
            track_id: "trk-1".to_string(),
            source: RemoteError::new(RemoteErrorKind::Unauthorized, "token expired"),
        };
        assert!(!err.is_retryable());
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("trk-1"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = Error::timeout("point upload");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("point upload"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
        assert!(err.remote().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_from_geolocation_error() {
        let err: Error = GeolocationError::PermissionDenied.into();
        assert!(matches!(err, Error::Geolocation(_)));
        assert!(err.to_string().contains("permission"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "interval_secs must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
