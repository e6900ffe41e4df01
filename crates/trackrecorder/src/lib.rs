//! `trackrecorder` - Crash-resilient GPS track recording with continuous remote sync
//!
//! This library turns a stream of raw geolocation samples into a recorded
//! track. Samples are thinned by a distance filter, classified by travel mode,
//! summarized into live statistics, uploaded to a remote track store in
//! batches, and mirrored into a local backup so a crash never loses data.
//!
//! The entry point is [`TrackingOrchestrator`]. The remote store, the position
//! provider and the local key/value store are supplied by the embedder through
//! the [`TrackApi`], [`GeolocationSource`] and [`KeyValueStore`] traits.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod activity;
pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod geolocation;
pub mod logging;
pub mod orchestrator;
pub mod point;
pub mod remote;
pub mod replay;
pub mod stats;
pub mod storage;
pub mod sync;

pub use activity::{ActivityClassification, ActivityDetector, ActivityThresholds, ActivityType};
pub use backup::{BackupSnapshot, BackupStore, RecoverableSession};
pub use config::Config;
pub use error::{Error, Result};
pub use filter::PositionFilter;
pub use geolocation::{
    GeolocationError, GeolocationEvent, GeolocationOptions, GeolocationSource, GeolocationWatch,
};
pub use logging::init_logging;
pub use orchestrator::{
    Collaborators, StartRequest, TrackingEvent, TrackingOrchestrator, TrackingState,
};
pub use point::{haversine_distance, RawPosition, TrackPoint};
pub use remote::{
    Credential, RemoteError, RemoteErrorKind, Track, TrackApi, TrackConfig, TrackId, TrackStatus,
    UnloadBeacon,
};
pub use replay::{replay, ReplaySummary};
pub use stats::{compute_stats, Bounds, TrackStats};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use sync::{FlushOutcome, FlushReport, FlushTrigger, SkipReason, SyncManager};
