/// Structured logging for the station tracker
///
/// Installs a `tracing` subscriber with station-aware context: every
/// per-station event carries a `station` field. Supports console output
/// and an optional append-only log file for daemon operation. Failures are
/// classified so that routine upstream hiccups do not drown out the errors
/// that need attention.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::LoggingConfig;
use crate::model::ServiceError;

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. When a log file
/// is configured, every event is also appended to it without ANSI colors.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServiceError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ServiceError::Configuration(format!("invalid log level {:?}: {}", config.level, e)))?;

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ServiceError::Configuration(format!("unable to open log file {}: {}", path.display(), e))
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| ServiceError::Configuration(format!("logger already installed: {}", e)))
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the directory returned a partial or empty rack
    Expected,
    /// Unexpected failure - indicates service degradation or a local fault
    Unexpected,
    /// Unknown - a single slow response, may or may not be a trend
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a failure by how much attention it deserves.
pub fn classify_failure(err: &ServiceError) -> FailureType {
    match err {
        ServiceError::MalformedRecord(_) => FailureType::Expected,
        ServiceError::Timeout { .. } => FailureType::Unknown,
        ServiceError::Transport(msg) if msg.contains("HTTP error: 5") => FailureType::Unknown,
        ServiceError::Transport(_)
        | ServiceError::PersistenceFailure { .. }
        | ServiceError::ArchiveReadFailure { .. }
        | ServiceError::ArchiveWriteFailure { .. }
        | ServiceError::Configuration(_) => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a per-station failure at the level its classification implies.
pub fn log_station_failure(station_id: &str, operation: &str, err: &ServiceError) {
    let failure_type = classify_failure(err);
    match failure_type {
        FailureType::Expected => {
            tracing::debug!(station = station_id, "{} failed [{}]: {}", operation, failure_type, err)
        }
        FailureType::Unknown => {
            tracing::warn!(station = station_id, "{} failed [{}]: {}", operation, failure_type, err)
        }
        FailureType::Unexpected => {
            tracing::error!(station = station_id, "{} failed [{}]: {}", operation, failure_type, err)
        }
    }
}

/// Log a failed station listing at the level its classification implies.
pub fn log_listing_failure(err: &ServiceError) {
    let failure_type = classify_failure(err);
    match failure_type {
        FailureType::Expected => {
            tracing::debug!("station listing failed [{}], skipping polling: {}", failure_type, err)
        }
        FailureType::Unknown => {
            tracing::warn!("station listing failed [{}], skipping polling: {}", failure_type, err)
        }
        FailureType::Unexpected => {
            tracing::error!("station listing failed [{}], skipping polling: {}", failure_type, err)
        }
    }
}

/// Log a summary of one poll cycle.
pub fn log_cycle_summary(cycle: u64, listed: usize, updated: usize, failed: usize, listing_failed: bool) {
    if listing_failed {
        tracing::warn!("Cycle {} complete: station listing failed, no stations polled", cycle);
        return;
    }

    let message = format!(
        "Cycle {} complete: {}/{} stations polled, {} published, {} failed",
        cycle,
        listed.saturating_sub(failed),
        listed,
        updated,
        failed
    );

    if failed == 0 {
        tracing::info!("{}", message);
    } else if failed == listed {
        tracing::error!("{}", message);
    } else {
        tracing::warn!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// In-memory sink for formatted log lines.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let sink = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_failure_classification() {
        let timeout = ServiceError::Timeout { operation: "getRack".into() };
        assert_eq!(classify_failure(&timeout), FailureType::Unknown);

        let server_error = ServiceError::Transport("HTTP error: 503".into());
        assert_eq!(classify_failure(&server_error), FailureType::Unknown);

        let refused = ServiceError::Transport("connection refused".into());
        assert_eq!(classify_failure(&refused), FailureType::Unexpected);

        let partial = ServiceError::MalformedRecord("no usable fields".into());
        assert_eq!(classify_failure(&partial), FailureType::Expected);

        let disk = ServiceError::ArchiveWriteFailure {
            path: PathBuf::from("archive"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(classify_failure(&disk), FailureType::Unexpected);
    }

    #[test]
    fn test_failure_type_display() {
        assert_eq!(FailureType::Expected.to_string(), "EXPECTED");
        assert_eq!(FailureType::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_listing_timeout_is_logged_like_station_timeouts() {
        let timeout = ServiceError::Timeout { operation: "getRacks".into() };
        let listing = capture(|| log_listing_failure(&timeout));
        let station = capture(|| log_station_failure("17", "poll", &timeout));

        assert!(listing.contains("WARN"), "got {:?}", listing);
        assert!(!listing.contains("ERROR"), "got {:?}", listing);
        assert!(listing.contains("[UNKNOWN]"));
        assert!(station.contains("WARN"), "got {:?}", station);
    }

    #[test]
    fn test_listing_refused_is_logged_as_error() {
        let refused = ServiceError::Transport("connection refused".into());
        let output = capture(|| log_listing_failure(&refused));
        assert!(output.contains("ERROR"), "got {:?}", output);
        assert!(output.contains("[UNEXPECTED]"));
    }

    #[test]
    fn test_cycle_summary_reports_failed_listing() {
        let output = capture(|| log_cycle_summary(3, 0, 0, 0, true));
        assert!(output.contains("WARN"), "got {:?}", output);
        assert!(output.contains("station listing failed"));
        assert!(!output.contains("0/0 stations polled"));
    }

    #[test]
    fn test_cycle_summary_levels() {
        assert!(capture(|| log_cycle_summary(1, 5, 2, 0, false)).contains("INFO"));
        assert!(capture(|| log_cycle_summary(1, 5, 2, 1, false)).contains("WARN"));
        assert!(capture(|| log_cycle_summary(1, 5, 0, 5, false)).contains("ERROR"));
    }
}
