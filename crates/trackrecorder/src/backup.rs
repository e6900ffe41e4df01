//! Crash-recovery snapshots of an in-progress session.
//!
//! The orchestrator writes a [`BackupSnapshot`] after every committed change
//! while a track is open. Each write replaces the previous snapshot whole.
//! On the next launch the snapshot is offered back as a [`RecoverableSession`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::activity::ActivityClassification;
use crate::error::Result;
use crate::orchestrator::TrackingState;
use crate::point::TrackPoint;
use crate::remote::TrackId;
use crate::stats::TrackStats;
use crate::storage::KeyValueStore;

/// Default storage slot for the snapshot.
pub const DEFAULT_BACKUP_KEY: &str = "gps_tracking_backup";

/// Everything needed to rebuild a session after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Remote track the points belong to.
    pub track_id: TrackId,
    /// All admitted points in order.
    pub points: Vec<TrackPoint>,
    /// Points not yet acknowledged by the remote store.
    pub pending_points: Vec<TrackPoint>,
    /// Stats over `points` at save time.
    pub stats: TrackStats,
    /// Activity classification at save time.
    pub activity: ActivityClassification,
    /// Orchestrator state at save time.
    pub tracking_state: TrackingState,
    /// Sequence number the next admitted point would receive.
    pub sequence_num: u64,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
}

/// Read-only summary of a session that can be recovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoverableSession {
    /// Remote track the session was recording into.
    pub track_id: TrackId,
    /// Number of recorded points.
    pub point_count: usize,
    /// Number of points that never reached the remote store.
    pub pending_count: usize,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Stats at save time.
    pub stats: TrackStats,
}

impl RecoverableSession {
    /// Summarize a snapshot. Snapshots without points are not worth recovering.
    #[must_use]
    pub fn from_snapshot(snapshot: &BackupSnapshot) -> Option<Self> {
        if snapshot.points.is_empty() {
            return None;
        }
        Some(Self {
            track_id: snapshot.track_id.clone(),
            point_count: snapshot.points.len(),
            pending_count: snapshot.pending_points.len(),
            saved_at: snapshot.saved_at,
            stats: snapshot.stats,
        })
    }
}

/// Snapshot persistence over a [`KeyValueStore`] slot.
#[derive(Debug, Clone)]
pub struct BackupStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl BackupStore {
    /// Create a backup store writing to `key`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// The storage slot in use.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Overwrite the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, snapshot: &BackupSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.store.set(&self.key, &json)?;
        debug!(
            track_id = %snapshot.track_id,
            points = snapshot.points.len(),
            pending = snapshot.pending_points.len(),
            "backup saved"
        );
        Ok(())
    }

    /// Read the stored snapshot.
    ///
    /// A payload that no longer parses is removed and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(&self) -> Result<Option<BackupSnapshot>> {
        let Some(json) = self.store.get(&self.key)? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "discarding unreadable backup");
                self.store.remove(&self.key)?;
                Ok(None)
            }
        }
    }

    /// Remove the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> Result<()> {
        if self.store.remove(&self.key)? {
            debug!(key = %self.key, "backup cleared");
        }
        Ok(())
    }
}
