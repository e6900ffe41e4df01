//! Remote track store abstraction.
//!
//! The engine never talks to a network itself. Everything it needs from the
//! remote side goes through [`TrackApi`] and, on teardown, [`UnloadBeacon`].
//! Wire formats belong to the implementors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::point::TrackPoint;
use crate::stats::TrackStats;

/// What went wrong on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The credential was refused. Retrying with the same credential is futile.
    Unauthorized,
    /// The request never got a response (offline, reset, DNS, ...).
    Network,
    /// The remote validated and refused the request.
    Rejected,
    /// The referenced track does not exist.
    NotFound,
    /// The remote failed while handling the request.
    Server,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Network => write!(f, "network"),
            Self::Rejected => write!(f, "rejected"),
            Self::NotFound => write!(f, "not found"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Error returned by a [`TrackApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct RemoteError {
    /// Classification of the failure.
    pub kind: RemoteErrorKind,
    /// Message from the transport or the remote.
    pub message: String,
}

impl RemoteError {
    /// Create a new remote error.
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a network failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    /// Shorthand for a refused credential.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    /// Whether the same request may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Network | RemoteErrorKind::Server)
    }

    /// Whether the credential was refused.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.kind == RemoteErrorKind::Unauthorized
    }
}

/// Opaque credential passed through to the remote store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a credential string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw credential.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the credential is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Identifier of a remote track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Wrap a track identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Points are being appended.
    Recording,
    /// Recording is suspended.
    Paused,
    /// Finalized.
    Completed,
    /// Finalized and published.
    Shared,
    /// Abandoned by the user.
    Deleted,
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recording => write!(f, "recording"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Shared => write!(f, "shared"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Handle to a remote track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Remote identifier.
    pub id: TrackId,
    /// Current status.
    pub status: TrackStatus,
    /// Authoritative statistics, filled in by finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TrackStats>,
}

/// Parameters for creating a new track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The remote track store.
///
/// `add_track_points` must be idempotent per `(track id, sequence_num)`:
/// the engine re-sends points whose acknowledgement it never saw.
#[async_trait::async_trait]
pub trait TrackApi: Send + Sync {
    /// Allocate a new track in the recording status.
    async fn create_track(
        &self,
        credential: &Credential,
        config: &TrackConfig,
    ) -> Result<Track, RemoteError>;

    /// Append points to a track, returning how many were newly inserted.
    async fn add_track_points(
        &self,
        credential: &Credential,
        track_id: &TrackId,
        points: &[TrackPoint],
    ) -> Result<usize, RemoteError>;

    /// Change the status of a track.
    async fn update_track(
        &self,
        credential: &Credential,
        track_id: &TrackId,
        status: TrackStatus,
    ) -> Result<Track, RemoteError>;

    /// Close a track and compute its authoritative statistics.
    async fn finalize_track(
        &self,
        credential: &Credential,
        track_id: &TrackId,
    ) -> Result<Track, RemoteError>;
}

/// Fire-and-forget transmission that survives process teardown.
///
/// Used only on unload, where nothing can be awaited.
pub trait UnloadBeacon: Send + Sync {
    /// Queue `payload` for delivery. Returns whether it was accepted.
    fn send(&self, credential: &Credential, track_id: &TrackId, payload: &[u8]) -> bool;
}

/// Payload carried by an unload beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconPayload {
    /// Track the points belong to.
    pub track_id: TrackId,
    /// Points that were still pending.
    pub points: Vec<TrackPoint>,
}
