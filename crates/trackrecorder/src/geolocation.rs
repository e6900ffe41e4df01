//! Geolocation source abstraction.
//!
//! Platform position providers implement [`GeolocationSource`]. A watch is a
//! scoped resource: [`GeolocationSource::watch`] hands back a
//! [`GeolocationWatch`] guard and the subscription lives exactly as long as
//! that guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::point::RawPosition;

/// Errors reported by a geolocation source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeolocationError {
    /// The user or platform denied location permission.
    #[error("location permission denied")]
    PermissionDenied,

    /// No position could be determined.
    #[error("position unavailable: {0}")]
    Unavailable(String),

    /// No fix arrived within the configured timeout.
    #[error("timed out waiting for a position fix")]
    Timeout,

    /// The platform has no geolocation support.
    #[error("geolocation not supported: {0}")]
    Unsupported(String),
}

/// Something delivered by an active watch.
#[derive(Debug, Clone, PartialEq)]
pub enum GeolocationEvent {
    /// A fresh sample.
    Position(RawPosition),
    /// A sensor failure. The watch stays active.
    Error(GeolocationError),
}

/// Acquisition options passed to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeolocationOptions {
    /// Ask for the most accurate fix the hardware can give.
    pub high_accuracy: bool,
    /// Give up on a fix after this long.
    pub timeout: Duration,
    /// Maximum age of a cached position; zero means always fresh.
    pub maximum_age: Duration,
}

impl Default for GeolocationOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(15),
            maximum_age: Duration::ZERO,
        }
    }
}

/// A platform position provider.
pub trait GeolocationSource: Send + Sync {
    /// Name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Start delivering events into `sink` until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be established at all.
    fn watch(
        &self,
        options: &GeolocationOptions,
        sink: mpsc::UnboundedSender<GeolocationEvent>,
    ) -> Result<GeolocationWatch, GeolocationError>;
}

/// Guard for an active geolocation watch.
///
/// Dropping the guard (or calling [`GeolocationWatch::release`]) raises the
/// shared stop signal and runs the source's release hook once.
pub struct GeolocationWatch {
    stop_signal: Arc<AtomicBool>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for GeolocationWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeolocationWatch")
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl GeolocationWatch {
    /// Create a guard over a stop signal polled by the source.
    #[must_use]
    pub fn new(stop_signal: Arc<AtomicBool>) -> Self {
        Self {
            stop_signal,
            on_release: None,
        }
    }

    /// Run `hook` when the watch is released (e.g. to unregister a callback).
    #[must_use]
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Whether the watch has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Release the watch now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl Drop for GeolocationWatch {
    fn drop(&mut self) {
        self.release_inner();
    }
}
