//! Continuous upload of pending points to the remote track store.
//!
//! [`SyncManager`] owns the pending buffer: points that were admitted but
//! not yet acknowledged by the remote store. Every flush, whatever caused it,
//! goes through [`SyncManager::request_flush`], and at most one upload is in
//! flight at any time.
//!
//! A flush uploads the buffer as it was when the flush started. Points that
//! arrive during the upload wait for the next one. On success exactly the
//! uploaded points leave the buffer; on failure nothing does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::point::TrackPoint;
use crate::remote::{Credential, RemoteError, TrackApi, TrackId};

/// What asked for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// The periodic sync timer.
    Timer,
    /// The pending buffer reached the batch size.
    Threshold,
    /// A lifecycle transition (pause, stop, backgrounding).
    Lifecycle,
    /// An explicit caller request.
    Manual,
}

impl FlushTrigger {
    /// Whether this trigger waits out the retry delay after failures.
    #[must_use]
    pub fn respects_backoff(self) -> bool {
        matches!(self, Self::Timer | Self::Threshold)
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Threshold => write!(f, "threshold"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Track the points were uploaded to.
    pub track_id: TrackId,
    /// What caused the flush.
    pub trigger: FlushTrigger,
    /// Points sent in this upload.
    pub uploaded: usize,
    /// Points the remote store reported as new.
    pub inserted: usize,
    /// Points still pending afterwards.
    pub remaining: usize,
}

/// Why a flush request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No track is bound.
    NoActiveTrack,
    /// Nothing is pending.
    Empty,
    /// Another upload is running.
    InFlight,
    /// Recent failures put periodic flushes on hold.
    BackingOff,
}

/// Outcome of [`SyncManager::request_flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// An upload succeeded.
    Flushed(FlushReport),
    /// No upload was attempted.
    Skipped(SkipReason),
}

/// Receives flush results, including those of background flushes.
pub trait SyncListener: Send + Sync {
    /// An upload succeeded.
    fn on_flushed(&self, report: &FlushReport);

    /// An upload failed. The points stay pending.
    fn on_failed(&self, error: &Error) {
        let _ = error;
    }
}

#[derive(Debug, Clone)]
struct Binding {
    track_id: TrackId,
    credential: Credential,
}

#[derive(Debug, Default)]
struct SyncState {
    binding: Option<Binding>,
    pending: Vec<TrackPoint>,
    uploading: bool,
    consecutive_failures: u32,
    retry_after: Option<Instant>,
}

struct Shared {
    api: Arc<dyn TrackApi>,
    config: SyncConfig,
    state: Mutex<SyncState>,
    idle: Notify,
    listener: Mutex<Option<Arc<dyn SyncListener>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn SyncListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
        }
    }
}

/// Clears the in-flight flag even if the flush future is dropped.
struct UploadSlot<'a> {
    shared: &'a Shared,
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        self.shared.state().uploading = false;
        self.shared.idle.notify_waiters();
    }
}

/// Handle to the pending buffer and its uploader.
///
/// Clones share the same buffer.
#[derive(Clone)]
pub struct SyncManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("SyncManager")
            .field("track_id", &state.binding.as_ref().map(|b| &b.track_id))
            .field("pending", &state.pending.len())
            .field("uploading", &state.uploading)
            .field("consecutive_failures", &state.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl SyncManager {
    /// Create a manager uploading through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn TrackApi>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                state: Mutex::new(SyncState::default()),
                idle: Notify::new(),
                listener: Mutex::new(None),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Install the receiver of flush results.
    pub fn set_listener(&self, listener: Arc<dyn SyncListener>) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Bind a track. Any previous buffer and failure history are dropped.
    pub fn begin(&self, track_id: TrackId, credential: Credential) {
        let mut state = self.shared.state();
        debug!(%track_id, "sync bound to track");
        state.binding = Some(Binding {
            track_id,
            credential,
        });
        state.pending.clear();
        state.consecutive_failures = 0;
        state.retry_after = None;
    }

    /// Unbind the track, stop the timer and return whatever was still pending.
    pub fn end(&self) -> Vec<TrackPoint> {
        self.stop_timer();
        let mut state = self.shared.state();
        state.binding = None;
        state.consecutive_failures = 0;
        state.retry_after = None;
        std::mem::take(&mut state.pending)
    }

    /// The bound track, if any.
    #[must_use]
    pub fn track_id(&self) -> Option<TrackId> {
        self.shared
            .state()
            .binding
            .as_ref()
            .map(|b| b.track_id.clone())
    }

    /// Append a point and return the new pending count.
    ///
    /// Reaching the batch size schedules a flush on the current runtime.
    pub fn enqueue(&self, point: TrackPoint) -> usize {
        let pending = {
            let mut state = self.shared.state();
            state.pending.push(point);
            state.pending.len()
        };

        if pending >= self.shared.config.max_points_per_batch {
            self.spawn_flush(FlushTrigger::Threshold);
        }
        pending
    }

    /// Replace the buffer with previously persisted points.
    pub fn restore_pending(&self, points: Vec<TrackPoint>) {
        self.shared.state().pending = points;
    }

    /// Copy of the pending buffer, oldest first.
    #[must_use]
    pub fn pending_points(&self) -> Vec<TrackPoint> {
        self.shared.state().pending.clone()
    }

    /// Number of pending points.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Whether an upload is running.
    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.shared.state().uploading
    }

    /// Failed uploads since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.shared.state().consecutive_failures
    }

    /// Flush now, bypassing the retry delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails or times out.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.request_flush(FlushTrigger::Manual).await
    }

    /// Upload the pending buffer unless a skip condition holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sync`] if the remote store fails and
    /// [`Error::Timeout`] if it does not answer within the flush timeout.
    pub async fn request_flush(&self, trigger: FlushTrigger) -> Result<FlushOutcome> {
        let limit = self.shared.config.flush_timeout();
        self.flush_within(trigger, limit).await
    }

    /// Like [`request_flush`](Self::request_flush) with a custom upload bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails or does not finish within `limit`.
    pub async fn flush_within(
        &self,
        trigger: FlushTrigger,
        limit: Duration,
    ) -> Result<FlushOutcome> {
        let (binding, batch) = {
            let mut state = self.shared.state();
            let Some(binding) = state.binding.clone() else {
                return Ok(FlushOutcome::Skipped(SkipReason::NoActiveTrack));
            };
            if state.uploading {
                return Ok(FlushOutcome::Skipped(SkipReason::InFlight));
            }
            if state.pending.is_empty() {
                return Ok(FlushOutcome::Skipped(SkipReason::Empty));
            }
            if trigger.respects_backoff()
                && state.retry_after.is_some_and(|at| Instant::now() < at)
            {
                return Ok(FlushOutcome::Skipped(SkipReason::BackingOff));
            }
            state.uploading = true;
            (binding, state.pending.clone())
        };
        let slot = UploadSlot {
            shared: &self.shared,
        };

        debug!(
            track_id = %binding.track_id,
            %trigger,
            points = batch.len(),
            "uploading pending points"
        );

        let upload = self
            .shared
            .api
            .add_track_points(&binding.credential, &binding.track_id, &batch);
        let result = match tokio::time::timeout(limit, upload).await {
            Ok(Ok(inserted)) => Ok(inserted),
            Ok(Err(source)) => Err(Some(source)),
            Err(_) => Err(None),
        };

        let outcome = match result {
            Ok(inserted) => Ok(self.complete_upload(&binding, trigger, &batch, inserted)),
            Err(source) => Err(self.fail_upload(&binding, trigger, batch.len(), source)),
        };
        drop(slot);

        let listener = self.shared.listener();
        match &outcome {
            Ok(report) => {
                if let Some(listener) = &listener {
                    listener.on_flushed(report);
                }
                if report.remaining >= self.shared.config.max_points_per_batch {
                    self.spawn_flush(FlushTrigger::Threshold);
                }
            }
            Err(e) => {
                if let Some(listener) = &listener {
                    listener.on_failed(e);
                }
            }
        }

        outcome.map(FlushOutcome::Flushed)
    }

    fn complete_upload(
        &self,
        binding: &Binding,
        trigger: FlushTrigger,
        batch: &[TrackPoint],
        inserted: usize,
    ) -> FlushReport {
        let mut state = self.shared.state();

        // The track may have been swapped out while the upload ran
        let same_track = state
            .binding
            .as_ref()
            .is_some_and(|b| b.track_id == binding.track_id);
        if same_track {
            if let Some(last_seq) = batch.last().map(|p| p.sequence_num) {
                state.pending.retain(|p| p.sequence_num > last_seq);
            }
            state.consecutive_failures = 0;
            state.retry_after = None;
        }

        let report = FlushReport {
            track_id: binding.track_id.clone(),
            trigger,
            uploaded: batch.len(),
            inserted,
            remaining: state.pending.len(),
        };
        info!(
            track_id = %report.track_id,
            %trigger,
            uploaded = report.uploaded,
            inserted = report.inserted,
            remaining = report.remaining,
            "flush complete"
        );
        report
    }

    fn fail_upload(
        &self,
        binding: &Binding,
        trigger: FlushTrigger,
        attempted: usize,
        source: Option<RemoteError>,
    ) -> Error {
        let mut state = self.shared.state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let delay = self
            .shared
            .config
            .backoff_delay(state.consecutive_failures);
        state.retry_after = Some(Instant::now() + delay);

        let error = match source {
            Some(source) => Error::Sync {
                pending: state.pending.len(),
                source,
            },
            None => Error::timeout(format!("uploading {attempted} points")),
        };
        warn!(
            track_id = %binding.track_id,
            %trigger,
            failures = state.consecutive_failures,
            retry_in_secs = delay.as_secs(),
            error = %error,
            "flush failed; points kept for retry"
        );
        error
    }

    /// Wait until no upload is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.shared.state().uploading {
                return;
            }
            notified.await;
        }
    }

    /// Upload until the buffer is empty. Used for the final flush of a track.
    ///
    /// Returns the number of points uploaded.
    ///
    /// # Errors
    ///
    /// Returns the first upload failure, or [`Error::NoActiveTrack`] when
    /// points are pending without a bound track.
    pub async fn flush_all(&self) -> Result<usize> {
        let mut uploaded = 0;
        loop {
            self.wait_idle().await;
            match self.request_flush(FlushTrigger::Lifecycle).await? {
                FlushOutcome::Flushed(report) => {
                    uploaded += report.uploaded;
                    if report.remaining == 0 {
                        return Ok(uploaded);
                    }
                }
                FlushOutcome::Skipped(SkipReason::InFlight) => {}
                FlushOutcome::Skipped(SkipReason::NoActiveTrack) => {
                    if self.pending_len() > 0 {
                        return Err(Error::NoActiveTrack);
                    }
                    return Ok(uploaded);
                }
                FlushOutcome::Skipped(SkipReason::Empty | SkipReason::BackingOff) => {
                    return Ok(uploaded);
                }
            }
        }
    }

    /// Start periodic flushing. Does nothing if the timer already runs.
    pub fn start_timer(&self) {
        let mut timer = self.shared.timer();
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; periodic sync disabled");
            return;
        };

        let period = self.shared.config.interval();
        if period.is_zero() {
            warn!("sync interval is zero; periodic sync disabled");
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        *timer = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                // Run the flush outside this task so stopping the timer never cuts an upload short
                SyncManager { shared }.spawn_flush(FlushTrigger::Timer);
            }
        }));
        debug!(interval_secs = period.as_secs(), "sync timer started");
    }

    /// Stop periodic flushing. An upload already running completes.
    pub fn stop_timer(&self) {
        if let Some(handle) = self.shared.timer().take() {
            handle.abort();
            debug!("sync timer stopped");
        }
    }

    /// Whether the periodic timer is running.
    #[must_use]
    pub fn timer_running(&self) -> bool {
        self.shared
            .timer()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn spawn_flush(&self, trigger: FlushTrigger) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(%trigger, "no async runtime; flush left to the next trigger");
            return;
        };
        let manager = self.clone();
        runtime.spawn(async move {
            match manager.request_flush(trigger).await {
                Ok(FlushOutcome::Skipped(reason)) => {
                    debug!(%trigger, ?reason, "flush skipped");
                }
                Ok(FlushOutcome::Flushed(_)) => {}
                Err(e) => debug!(%trigger, error = %e, "background flush failed"),
            }
        });
    }
}
