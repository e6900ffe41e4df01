//! The tracking state machine.
//!
//! [`TrackingOrchestrator`] wires the position filter, activity detector,
//! stats aggregator, backup store and sync manager together and decides
//! which operations are legal:
//!
//! ```text
//! Idle -> Starting -> Recording <-> Paused -> Stopping -> Idle
//!            |                                   |
//!            +-------------> Error <-------------+
//! ```
//!
//! Any non-idle state returns to `Idle` through [`TrackingOrchestrator::discard`].
//! Lifecycle operations run one at a time. Sample handling is synchronous and
//! may interleave with them; samples are only accepted while recording.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::activity::{ActivityClassification, ActivityDetector};
use crate::backup::{BackupSnapshot, BackupStore, RecoverableSession};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::PositionFilter;
use crate::geolocation::{
    GeolocationError, GeolocationEvent, GeolocationSource, GeolocationWatch,
};
use crate::point::{RawPosition, TrackPoint};
use crate::remote::{
    BeaconPayload, Credential, Track, TrackApi, TrackConfig, TrackId, TrackStatus, UnloadBeacon,
};
use crate::stats::{compute_stats, TrackStats};
use crate::storage::KeyValueStore;
use crate::sync::{FlushOutcome, FlushReport, FlushTrigger, SyncListener, SyncManager};

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No track is open.
    #[default]
    Idle,
    /// Waiting for the remote store to allocate a track.
    Starting,
    /// Samples are being admitted.
    Recording,
    /// The track is open but samples are ignored.
    Paused,
    /// Final flush and finalization are running.
    Stopping,
    /// A remote acquisition failed. Local data is kept.
    Error,
}

impl TrackingState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TrackingState::{Error, Idle, Paused, Recording, Starting, Stopping};
        match (self, next) {
            (Idle, Starting)
            | (Starting, Recording | Error)
            | (Recording, Paused | Stopping | Error)
            | (Paused, Recording | Stopping | Error)
            | (Stopping, Idle | Error)
            | (Error, Stopping) => true,
            (from, Idle) => from != Idle,
            _ => false,
        }
    }

    /// Whether a track is open in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Recording => write!(f, "recording"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Something observers may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// The state machine moved.
    StateChanged {
        /// Previous state.
        from: TrackingState,
        /// New state.
        to: TrackingState,
    },
    /// A sample was admitted.
    PointAdded {
        /// The new point.
        point: TrackPoint,
        /// Stats including the new point.
        stats: TrackStats,
        /// Activity after the new point.
        activity: ActivityClassification,
    },
    /// Pending points reached the remote store.
    Flushed(FlushReport),
    /// An upload failed. The points are still pending.
    SyncFailed {
        /// Human-readable failure.
        message: String,
        /// Whether a later retry may succeed.
        retryable: bool,
        /// Whether the credential was refused.
        unauthorized: bool,
    },
    /// The geolocation source reported a problem. Recording continues.
    GeolocationError(GeolocationError),
}

/// Parameters for [`TrackingOrchestrator::start`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Credential passed to every remote call of the session.
    pub credential: Credential,
    /// Attributes of the new track.
    pub config: TrackConfig,
}

impl StartRequest {
    /// A request with default track attributes.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            config: TrackConfig::default(),
        }
    }
}

/// External collaborators of the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    /// Remote track store.
    pub api: Arc<dyn TrackApi>,
    /// Position provider.
    pub geolocation: Arc<dyn GeolocationSource>,
    /// Teardown transmission, if the platform has one.
    pub beacon: Option<Arc<dyn UnloadBeacon>>,
    /// Local persistence for the backup snapshot.
    pub store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("geolocation", &self.geolocation.name())
            .field("beacon", &self.beacon.is_some())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// A live geolocation subscription and the task feeding it into the session.
#[derive(Debug)]
struct ActiveWatch {
    _guard: GeolocationWatch,
    pump: JoinHandle<()>,
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[derive(Debug)]
struct Session {
    state: TrackingState,
    track_id: Option<TrackId>,
    credential: Option<Credential>,
    points: Vec<TrackPoint>,
    stats: TrackStats,
    filter: PositionFilter,
    activity: ActivityDetector,
    recoverable: Option<BackupSnapshot>,
    watch: Option<ActiveWatch>,
    last_error: Option<String>,
}

impl Session {
    fn new(config: &Config) -> Self {
        Self {
            state: TrackingState::Idle,
            track_id: None,
            credential: None,
            points: Vec::new(),
            stats: TrackStats::default(),
            filter: PositionFilter::new(config.filter.min_distance_meters),
            activity: ActivityDetector::new(
                config.activity.window_size,
                config.activity.thresholds,
            ),
            recoverable: None,
            watch: None,
            last_error: None,
        }
    }

    /// Forget everything about the current track.
    fn clear_track(&mut self) {
        self.track_id = None;
        self.credential = None;
        self.points.clear();
        self.stats = TrackStats::default();
        self.filter.reset();
        self.activity.reset();
        self.watch = None;
        self.last_error = None;
    }
}

struct Inner {
    api: Arc<dyn TrackApi>,
    geolocation: Arc<dyn GeolocationSource>,
    beacon: Option<Arc<dyn UnloadBeacon>>,
    backup: BackupStore,
    sync: SyncManager,
    config: Config,
    session: Mutex<Session>,
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<TrackingEvent>,
}

/// Routes sync results back into the session.
struct SessionSyncListener {
    inner: Weak<Inner>,
}

impl SyncListener for SessionSyncListener {
    fn on_flushed(&self, report: &FlushReport) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let orchestrator = TrackingOrchestrator { inner };
        orchestrator.persist();
        orchestrator.emit(TrackingEvent::Flushed(report.clone()));
    }

    fn on_failed(&self, error: &Error) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        TrackingOrchestrator { inner }.emit(TrackingEvent::SyncFailed {
            message: error.to_string(),
            retryable: error.is_retryable(),
            unauthorized: error.is_auth_error(),
        });
    }
}

/// Handle to one recording engine. Clones share the same session.
#[derive(Clone)]
pub struct TrackingOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TrackingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session();
        f.debug_struct("TrackingOrchestrator")
            .field("state", &session.state)
            .field("track_id", &session.track_id)
            .field("points", &session.points.len())
            .field("sync", &self.inner.sync)
            .finish_non_exhaustive()
    }
}

impl TrackingOrchestrator {
    /// Create an orchestrator and look for a session left behind by a crash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] for an invalid `config` and an
    /// error if the backup store cannot be read.
    pub fn new(collaborators: Collaborators, config: Config) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            api,
            geolocation,
            beacon,
            store,
        } = collaborators;

        let backup = BackupStore::new(store, config.storage.backup_key.clone());
        let mut session = Session::new(&config);
        match backup.load()? {
            Some(snapshot) if !snapshot.points.is_empty() => {
                info!(
                    track_id = %snapshot.track_id,
                    points = snapshot.points.len(),
                    pending = snapshot.pending_points.len(),
                    saved_at = %snapshot.saved_at,
                    "found recoverable session"
                );
                session.recoverable = Some(snapshot);
            }
            Some(_) => {
                debug!("removing backup without points");
                backup.clear()?;
            }
            None => {}
        }

        let sync = SyncManager::new(Arc::clone(&api), config.sync.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new(Inner {
            api,
            geolocation,
            beacon,
            backup,
            sync,
            config,
            session: Mutex::new(session),
            lifecycle: tokio::sync::Mutex::new(()),
            events,
        });
        inner.sync.set_listener(Arc::new(SessionSyncListener {
            inner: Arc::downgrade(&inner),
        }));

        Ok(Self { inner })
    }

    /// Subscribe to state, point, sync and sensor events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.inner.events.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TrackingState {
        self.session().state
    }

    /// The open track, if any.
    #[must_use]
    pub fn track_id(&self) -> Option<TrackId> {
        self.session().track_id.clone()
    }

    /// All points admitted in this session.
    #[must_use]
    pub fn points(&self) -> Vec<TrackPoint> {
        self.session().points.clone()
    }

    /// Points not yet acknowledged by the remote store.
    #[must_use]
    pub fn pending_points(&self) -> Vec<TrackPoint> {
        self.inner.sync.pending_points()
    }

    /// Live stats of the session.
    #[must_use]
    pub fn stats(&self) -> TrackStats {
        self.session().stats
    }

    /// Current activity classification.
    #[must_use]
    pub fn activity(&self) -> ActivityClassification {
        self.session().activity.current()
    }

    /// Message of the failure that put the orchestrator into `Error`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.session().last_error.clone()
    }

    /// Summary of a session found in the backup at startup.
    #[must_use]
    pub fn recoverable_session(&self) -> Option<RecoverableSession> {
        self.session()
            .recoverable
            .as_ref()
            .and_then(RecoverableSession::from_snapshot)
    }

    /// Open a new track and start recording.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle, [`Error::Validation`]
    /// for a blank credential, [`Error::TrackCreate`] if the remote store
    /// refuses, [`Error::Timeout`] if it does not answer within the flush
    /// timeout, and [`Error::Geolocation`] if no watch can be established.
    pub async fn start(&self, request: StartRequest) -> Result<TrackId> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        {
            let mut session = self.session();
            require(&session, "start", &[TrackingState::Idle])?;
            if request.credential.is_blank() {
                return Err(Error::validation("a credential is required to start tracking"));
            }
            self.transition(&mut session, TrackingState::Starting)?;
        }

        let create = self
            .inner
            .api
            .create_track(&request.credential, &request.config);
        let created = match tokio::time::timeout(self.remote_timeout(), create).await {
            Ok(Ok(track)) => Ok(track),
            Ok(Err(source)) => Err(Error::TrackCreate(source)),
            Err(_) => Err(Error::timeout("creating track")),
        };
        let track = match created {
            Ok(track) => track,
            Err(e) => {
                error!(error = %e, "track creation failed");
                let mut session = self.session();
                session.last_error = Some(e.to_string());
                self.transition(&mut session, TrackingState::Error)?;
                return Err(e);
            }
        };

        let track_id = track.id;
        {
            let mut session = self.session();
            session.clear_track();
            session.recoverable = None;
            session.track_id = Some(track_id.clone());
            session.credential = Some(request.credential.clone());
        }
        self.inner
            .sync
            .begin(track_id.clone(), request.credential);

        self.enter_recording()?;
        info!(%track_id, "tracking started");
        Ok(track_id)
    }

    /// Suspend recording.
    ///
    /// The pending buffer gets a bounded flush attempt and the remote track
    /// is marked paused. Neither failing blocks the transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless recording.
    pub async fn pause(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let (watch, binding) = {
            let mut session = self.session();
            require(&session, "pause", &[TrackingState::Recording])?;
            self.transition(&mut session, TrackingState::Paused)?;
            self.persist_locked(&session);
            (session.watch.take(), binding(&session))
        };
        drop(watch);

        // A timer or threshold upload may still be running; stopping the
        // timer first would cancel it
        let limit = self.inner.config.sync.pause_flush_timeout();
        if tokio::time::timeout(limit, self.inner.sync.wait_idle())
            .await
            .is_err()
        {
            warn!("upload still running after pause timeout");
        }
        self.inner.sync.stop_timer();
        if let Err(e) = self
            .inner
            .sync
            .flush_within(FlushTrigger::Lifecycle, limit)
            .await
        {
            warn!(error = %e, "flush on pause failed; points kept");
        }

        if let Some((track_id, credential)) = binding {
            self.update_status(&credential, &track_id, TrackStatus::Paused)
                .await;
        }
        info!("tracking paused");
        Ok(())
    }

    /// Continue recording after [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless paused and
    /// [`Error::Geolocation`] if the watch cannot be re-established.
    pub async fn resume(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let binding = {
            let session = self.session();
            require(&session, "resume", &[TrackingState::Paused])?;
            binding(&session)
        };

        if let Some((track_id, credential)) = binding {
            self.update_status(&credential, &track_id, TrackStatus::Recording)
                .await;
        }

        self.enter_recording()?;
        info!("tracking resumed");
        Ok(())
    }

    /// Upload everything still pending and finalize the track.
    ///
    /// Also retries a stop that previously left the orchestrator in `Error`.
    /// On failure the points and the backup are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from other states, the final
    /// flush error, [`Error::TrackFinalize`], or [`Error::Timeout`] if
    /// finalization does not answer within the flush timeout.
    pub async fn stop(&self) -> Result<Track> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let (watch, track_id, credential) = {
            let mut session = self.session();
            let retry = session.state == TrackingState::Error && session.track_id.is_some();
            if !retry {
                require(
                    &session,
                    "stop",
                    &[TrackingState::Recording, TrackingState::Paused],
                )?;
            }
            let Some((track_id, credential)) = binding(&session) else {
                return Err(Error::NoActiveTrack);
            };
            self.transition(&mut session, TrackingState::Stopping)?;
            self.persist_locked(&session);
            (session.watch.take(), track_id, credential)
        };
        drop(watch);
        self.inner.sync.stop_timer();

        if let Err(e) = self.inner.sync.flush_all().await {
            error!(%track_id, error = %e, "final flush failed");
            self.fail(&e);
            return Err(e);
        }

        let finalize = self.inner.api.finalize_track(&credential, &track_id);
        let finalized = match tokio::time::timeout(self.remote_timeout(), finalize).await {
            Ok(Ok(track)) => Ok(track),
            Ok(Err(source)) => Err(Error::TrackFinalize {
                track_id: track_id.to_string(),
                source,
            }),
            Err(_) => Err(Error::timeout(format!("finalizing track {track_id}"))),
        };
        let track = match finalized {
            Ok(track) => track,
            Err(e) => {
                error!(error = %e, "finalize failed");
                self.fail(&e);
                return Err(e);
            }
        };

        self.inner.sync.end();
        {
            let mut session = self.session();
            session.clear_track();
            self.transition(&mut session, TrackingState::Idle)?;
        }
        self.clear_backup();
        info!(%track_id, "tracking stopped");
        Ok(track)
    }

    /// Abandon the open track without finalizing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when idle.
    pub async fn discard(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let binding = {
            let mut session = self.session();
            if session.state == TrackingState::Idle {
                return Err(Error::InvalidTransition {
                    operation: "discard",
                    state: session.state,
                });
            }
            let binding = binding(&session);
            session.clear_track();
            self.transition(&mut session, TrackingState::Idle)?;
            binding
        };
        let dropped = self.inner.sync.end();

        // Without a bound track the stored backup belongs to an earlier session
        if let Some((track_id, credential)) = &binding {
            self.update_status(credential, track_id, TrackStatus::Deleted)
                .await;
            self.clear_backup();
        }
        info!(
            track_id = ?binding.map(|(id, _)| id),
            dropped_pending = dropped.len(),
            "tracking discarded"
        );
        Ok(())
    }

    /// Feed one raw sample. Returns the admitted point, if any.
    ///
    /// Samples are dropped unless recording.
    pub fn handle_position(&self, raw: RawPosition) -> Option<TrackPoint> {
        let (point, stats, activity) = {
            let mut session = self.session();
            if session.state != TrackingState::Recording {
                trace!(state = %session.state, "dropping sample");
                return None;
            }

            let point = session.filter.admit(&raw)?;
            let activity = session.activity.add_speed(point.speed_mps);
            session.points.push(point.clone());
            session.stats = compute_stats(&session.points);
            self.inner.sync.enqueue(point.clone());
            self.persist_locked(&session);
            (point, session.stats, activity)
        };

        trace!(
            sequence_num = point.sequence_num,
            distance = stats.total_distance_meters,
            "point admitted"
        );
        self.emit(TrackingEvent::PointAdded {
            point: point.clone(),
            stats,
            activity,
        });
        Some(point)
    }

    /// Surface a sensor failure. The state does not change.
    pub fn handle_geolocation_error(&self, error: GeolocationError) {
        warn!(error = %error, "geolocation error");
        self.emit(TrackingEvent::GeolocationError(error));
    }

    /// Upload pending points now.
    ///
    /// # Errors
    ///
    /// Returns the upload error; the points stay pending.
    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        self.inner.sync.request_flush(FlushTrigger::Manual).await
    }

    /// The host is moving the app to the background.
    ///
    /// # Errors
    ///
    /// Returns the upload error; the points stay pending.
    pub async fn on_visibility_hidden(&self) -> Result<FlushOutcome> {
        self.persist();
        self.inner.sync.request_flush(FlushTrigger::Lifecycle).await
    }

    /// The host is tearing the process down. Nothing here awaits.
    ///
    /// Writes the backup and hands any pending points to the unload beacon.
    /// Returns whether the beacon accepted a payload.
    pub fn on_unload(&self) -> bool {
        let (track_id, credential) = {
            let session = self.session();
            self.persist_locked(&session);
            match binding(&session) {
                Some(binding) if session.state.is_active() => binding,
                _ => return false,
            }
        };

        let Some(beacon) = &self.inner.beacon else {
            return false;
        };
        let points = self.inner.sync.pending_points();
        if points.is_empty() {
            return false;
        }

        let count = points.len();
        let payload = BeaconPayload {
            track_id: track_id.clone(),
            points,
        };
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "could not encode unload payload");
                return false;
            }
        };

        let accepted = beacon.send(&credential, &track_id, &bytes);
        debug!(%track_id, points = count, accepted, "unload beacon sent");
        accepted
    }

    /// Upload the pending points of the session found at startup.
    ///
    /// Tracking does not resume. The backup is cleared only after the upload
    /// succeeds. Returns the number of points uploaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle, [`Error::Validation`]
    /// for a blank credential or when nothing is recoverable, and the upload
    /// error otherwise.
    pub async fn recover_session(&self, credential: Credential) -> Result<usize> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let snapshot = {
            let session = self.session();
            require(&session, "recover", &[TrackingState::Idle])?;
            if credential.is_blank() {
                return Err(Error::validation("a credential is required to recover"));
            }
            session
                .recoverable
                .clone()
                .ok_or_else(|| Error::validation("no recoverable session"))?
        };

        let track_id = snapshot.track_id.clone();
        let pending = snapshot.pending_points;
        let uploaded = if pending.is_empty() {
            0
        } else {
            self.inner.sync.begin(track_id.clone(), credential);
            self.inner.sync.restore_pending(pending);
            let result = self.inner.sync.flush_all().await;
            self.inner.sync.end();
            match result {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    warn!(%track_id, error = %e, "recovery upload failed; backup kept");
                    return Err(e);
                }
            }
        };

        self.inner.backup.clear()?;
        self.session().recoverable = None;
        info!(%track_id, uploaded, "recovered session");
        Ok(uploaded)
    }

    /// Forget the session found at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup cannot be removed.
    pub fn dismiss_recovery(&self) -> Result<()> {
        let dismissed = self.session().recoverable.take();
        if let Some(snapshot) = dismissed {
            self.inner.backup.clear()?;
            info!(track_id = %snapshot.track_id, "recoverable session dismissed");
        }
        Ok(())
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TrackingEvent) {
        // Err only means nobody is listening
        let _ = self.inner.events.send(event);
    }

    fn transition(&self, session: &mut Session, to: TrackingState) -> Result<()> {
        let from = session.state;
        if !from.can_transition_to(to) {
            return Err(Error::internal(format!(
                "illegal transition from {from} to {to}"
            )));
        }
        session.state = to;
        debug!(%from, %to, "state changed");
        self.emit(TrackingEvent::StateChanged { from, to });
        Ok(())
    }

    /// Acquire the watch, start the timer and move to `Recording`.
    fn enter_recording(&self) -> Result<()> {
        match self.open_watch() {
            Ok(watch) => {
                let mut session = self.session();
                session.watch = Some(watch);
                self.transition(&mut session, TrackingState::Recording)?;
                self.persist_locked(&session);
            }
            Err(e) => {
                error!(error = %e, "could not watch position");
                self.handle_geolocation_error(e.clone());
                let mut session = self.session();
                session.last_error = Some(e.to_string());
                self.transition(&mut session, TrackingState::Error)?;
                self.persist_locked(&session);
                return Err(e.into());
            }
        }
        self.inner.sync.start_timer();
        Ok(())
    }

    fn open_watch(&self) -> std::result::Result<ActiveWatch, GeolocationError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = self.inner.config.geolocation.to_options();
        let guard = self.inner.geolocation.watch(&options, tx)?;
        debug!(source = self.inner.geolocation.name(), "geolocation watch acquired");

        let weak = Arc::downgrade(&self.inner);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let orchestrator = TrackingOrchestrator { inner };
                match event {
                    GeolocationEvent::Position(raw) => {
                        orchestrator.handle_position(raw);
                    }
                    GeolocationEvent::Error(e) => orchestrator.handle_geolocation_error(e),
                }
            }
        });

        Ok(ActiveWatch {
            _guard: guard,
            pump,
        })
    }

    fn fail(&self, error: &Error) {
        let mut session = self.session();
        session.last_error = Some(error.to_string());
        if let Err(e) = self.transition(&mut session, TrackingState::Error) {
            error!(error = %e, "could not enter error state");
        }
        self.persist_locked(&session);
    }

    /// Bound on remote calls made while the lifecycle lock is held.
    fn remote_timeout(&self) -> std::time::Duration {
        self.inner.config.sync.flush_timeout()
    }

    async fn update_status(
        &self,
        credential: &Credential,
        track_id: &TrackId,
        status: TrackStatus,
    ) {
        let update = self.inner.api.update_track(credential, track_id, status);
        match tokio::time::timeout(self.remote_timeout(), update).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(%track_id, %status, error = %e, "could not update track status");
            }
            Err(_) => warn!(%track_id, %status, "track status update timed out"),
        }
    }

    fn persist(&self) {
        let session = self.session();
        self.persist_locked(&session);
    }

    /// Write the backup if a track is open.
    fn persist_locked(&self, session: &Session) {
        if !session.state.is_active() {
            return;
        }
        let Some(track_id) = session.track_id.clone() else {
            return;
        };

        let snapshot = BackupSnapshot {
            track_id,
            points: session.points.clone(),
            pending_points: self.inner.sync.pending_points(),
            stats: session.stats,
            activity: session.activity.current(),
            tracking_state: session.state,
            sequence_num: session.filter.next_sequence_num(),
            saved_at: Utc::now(),
        };
        if let Err(e) = self.inner.backup.save(&snapshot) {
            error!(error = %e, "failed to write backup");
        }
    }

    fn clear_backup(&self) {
        if let Err(e) = self.inner.backup.clear() {
            error!(error = %e, "failed to clear backup");
        }
    }
}

fn require(session: &Session, operation: &'static str, allowed: &[TrackingState]) -> Result<()> {
    if allowed.contains(&session.state) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            operation,
            state: session.state,
        })
    }
}

fn binding(session: &Session) -> Option<(TrackId, Credential)> {
    Some((session.track_id.clone()?, session.credential.clone()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(TrackingState::Idle.to_string(), "idle");
        assert_eq!(TrackingState::Recording.to_string(), "recording");
        assert_eq!(TrackingState::Error.to_string(), "error");
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&TrackingState::Stopping).unwrap();
        assert_eq!(json, r#""stopping""#);
        let state: TrackingState = serde_json::from_str(r#""paused""#).unwrap();
        assert_eq!(state, TrackingState::Paused);
    }

    #[test]
    fn test_happy_path_transitions() {
        use TrackingState::{Idle, Paused, Recording, Starting, Stopping};
        let path = [Idle, Starting, Recording, Paused, Recording, Stopping, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_reachable_from_starting_and_stopping() {
        assert!(TrackingState::Starting.can_transition_to(TrackingState::Error));
        assert!(TrackingState::Stopping.can_transition_to(TrackingState::Error));
        assert!(TrackingState::Error.can_transition_to(TrackingState::Stopping));
        assert!(!TrackingState::Idle.can_transition_to(TrackingState::Error));
    }

    #[test]
    fn test_discard_reaches_idle_from_any_active_state() {
        use TrackingState::{Error, Idle, Paused, Recording, Starting, Stopping};
        for state in [Starting, Recording, Paused, Stopping, Error] {
            assert!(state.can_transition_to(Idle), "{state} -> idle");
        }
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn test_illegal_transitions() {
        use TrackingState::{Idle, Paused, Recording, Starting, Stopping};
        assert!(!Idle.can_transition_to(Recording));
        assert!(!Idle.can_transition_to(Paused));
        assert!(!Starting.can_transition_to(Paused));
        assert!(!Paused.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Recording));
    }

    #[test]
    fn test_start_request_defaults() {
        let request = StartRequest::new(Credential::new("token"));
        assert_eq!(request.config, TrackConfig::default());
        assert!(!request.credential.is_blank());
    }
}
