/// Core data types for the bike-share station tracker.
///
/// This module defines the shared domain model imported by all other modules:
/// the canonical `Station` record, the partial `StationFields` bundle produced
/// by the record mapper, history points replayed from the archive, and the
/// service-wide error taxonomy. It contains no I/O.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Station types
// ---------------------------------------------------------------------------

/// WGS84 position of a docking station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// The canonical current state of one docking station.
///
/// Serialized as one element of the published current-state file, with the
/// position flattened into `latitude`/`longitude` and `graphUrl` written as
/// `null` when no chart is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    #[serde(flatten)]
    pub position: Position,
    pub ready_count: u32,
    pub empty_count: u32,
    pub online: bool,
    pub description: String,
    pub updated_at: DateTime<Utc>,
    pub graph_url: Option<String>,
}

/// Usable fields extracted from one raw directory payload.
///
/// Every field is optional: malformed values are dropped individually by
/// the mapper rather than failing the whole record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationFields {
    pub description: Option<String>,
    pub position: Option<Position>,
    pub ready_count: Option<u32>,
    pub empty_count: Option<u32>,
    pub online: Option<bool>,
}

impl StationFields {
    /// True when no field survived mapping.
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.position.is_none()
            && self.ready_count.is_none()
            && self.empty_count.is_none()
            && self.online.is_none()
    }
}

// ---------------------------------------------------------------------------
// History types
// ---------------------------------------------------------------------------

/// One replayed observation of a station, taken from an archive snapshot.
///
/// Counts stay optional because snapshots written by older versions of the
/// service did not always carry them.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    pub captured_at: DateTime<Utc>,
    pub ready_count: Option<u32>,
    pub empty_count: Option<u32>,
    pub online: Option<bool>,
}

impl TimeSeriesPoint {
    /// Percentage of reporting docks holding a bike, floored.
    ///
    /// `None` when either count is missing; `0` when both are present but no
    /// docks report at all. Integer arithmetic, so 29/100 yields 29 and not 28.
    pub fn fullness_percent(&self) -> Option<u32> {
        let (ready, empty) = (self.ready_count?, self.empty_count?);
        let total = u64::from(ready) + u64::from(empty);
        if total == 0 {
            Some(0)
        } else {
            Some((u64::from(ready) * 100 / total) as u32)
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while polling, reconciling or persisting stations.
///
/// `Timeout`, `Transport` and `MalformedRecord` are contained within a single
/// station's iteration. `PersistenceFailure` is fatal to the poll loop;
/// `ArchiveWriteFailure` is logged and the cycle continues.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A directory call exceeded its deadline.
    #[error("timeout: {operation} exceeded deadline")]
    Timeout { operation: String },
    /// Network-level failure or a non-2xx HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The payload could not be decoded or carried no usable fields.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    /// The current-state file could not be read or written.
    #[error("persistence failure at {}: {source}", .path.display())]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The archive directory could not be listed during replay.
    #[error("archive read failure at {}: {source}", .path.display())]
    ArchiveReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// An archive snapshot could not be written.
    #[error("archive write failure at {}: {source}", .path.display())]
    ArchiveWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ServiceError {
    /// Whether this error must stop the poll loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::PersistenceFailure { .. } | ServiceError::Configuration(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
