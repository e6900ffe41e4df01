//! Logging configuration for trackrecorder.
//!
//! Sets up the tracing subscriber used by the `trackrec` binary and by
//! embedders that want the engine's lifecycle and sync diagnostics. Output
//! goes to stderr so `--json` output on stdout stays machine-readable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Targets that make up the engine's own output.
const TARGETS: [&str; 2] = ["trackrecorder", "trackrec"];

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Lifecycle events. Routine flushes are hidden.
    #[default]
    Normal,
    /// Debug output, including every flush.
    Verbose,
    /// Per-sample tracing.
    Trace,
}

impl Verbosity {
    /// The level applied to the engine's targets.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// `EnvFilter` directives for this verbosity.
    ///
    /// At normal verbosity the sync module logs warnings only; a periodic
    /// flush every few seconds would drown out lifecycle messages.
    #[must_use]
    pub fn directives(self) -> String {
        let level = self.level();
        let mut directives: Vec<String> =
            TARGETS.iter().map(|target| format!("{target}={level}")).collect();
        if self == Self::Normal {
            directives.push(format!("trackrecorder::sync={}", Level::WARN));
        }
        directives.join(",")
    }
}

/// Initialize the logging system.
///
/// Call once at startup. `RUST_LOG`, when set, replaces the directives
/// derived from `verbosity`.
///
/// ```no_run
/// use trackrecorder::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= Verbosity::Verbose)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // A subscriber may already be installed by the embedding application
    let _ = subscriber.try_init();
}

/// Initialize logging for tests: warnings and errors through the test writer.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

impl PartialOrd for Verbosity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Verbosity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(Verbosity::Quiet.level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.level(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.level(), Level::TRACE);
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn test_verbosity_ordering() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Verbose < Verbosity::Trace);
    }

    #[test]
    fn test_normal_directives_quiet_sync() {
        let directives = Verbosity::Normal.directives();
        assert!(directives.contains("trackrecorder=INFO"));
        assert!(directives.contains("trackrec=INFO"));
        assert!(directives.contains("trackrecorder::sync=WARN"));
    }

    #[test]
    fn test_verbose_directives_include_sync() {
        let directives = Verbosity::Verbose.directives();
        assert_eq!(directives, "trackrecorder=DEBUG,trackrec=DEBUG");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        // Only the first call installs a subscriber.
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Trace);
        init_test_logging();
    }
}
