/// Append-only archive of poll-cycle snapshots.
///
/// Each poll cycle writes one immutable JSON array of station records into
/// the archive directory, named by its UTC capture time
/// (`YYYYMMDD-HHMMSS.json`) so lexical order is chronological order.
/// Replaying every snapshot reconstructs per-station history; the archive is
/// the source of truth for charts and is never rewritten or pruned here.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::analysis::history::{self, ChartSeries};
use crate::model::{Position, ServiceError, Station, TimeSeriesPoint};

/// Filename format of a snapshot, without the `.json` extension.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y%m%d-%H%M%S";

// ---------------------------------------------------------------------------
// Archived record
// ---------------------------------------------------------------------------

/// One station as stored in a snapshot or the current-state file, read
/// leniently: snapshots from older versions of the service may lack counts
/// or carry RFC 2822 timestamps.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedStation {
    pub id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub ready_count: Option<u32>,
    #[serde(default)]
    pub empty_count: Option<u32>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub graph_url: Option<String>,
}

impl ArchivedStation {
    /// Parsed `updatedAt`, accepting RFC 3339 and legacy RFC 2822 values.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.updated_at.as_deref()?.trim();
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_rfc2822(raw))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert into a canonical station. Returns `None` when the record has
    /// no position or no parseable timestamp.
    pub fn into_station(self) -> Option<Station> {
        let updated_at = self.updated_at()?;
        Some(Station {
            position: Position {
                latitude: self.latitude?,
                longitude: self.longitude?,
            },
            ready_count: self.ready_count.unwrap_or(0),
            empty_count: self.empty_count.unwrap_or(0),
            online: self.online.unwrap_or(true),
            description: self.description.unwrap_or_default(),
            updated_at,
            graph_url: self.graph_url,
            id: self.id,
        })
    }
}

// ---------------------------------------------------------------------------
// History index
// ---------------------------------------------------------------------------

/// Per-station history replayed from the whole archive, each series ordered
/// by capture time with at most one point per timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryIndex {
    series: HashMap<String, Vec<TimeSeriesPoint>>,
}

impl HistoryIndex {
    /// History of one station, oldest first. Empty when never archived.
    pub fn series(&self, station_id: &str) -> &[TimeSeriesPoint] {
        self.series.get(station_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn station_count(&self) -> usize {
        self.series.len()
    }

    /// Chart series for one station, labelled in `tz`.
    pub fn chart_for<Tz>(&self, station_id: &str, tz: &Tz) -> Option<ChartSeries>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        history::build_series(self.series(station_id), tz)
    }
}

// ---------------------------------------------------------------------------
// Archive store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a snapshot captured at `captured_at` is written to.
    pub fn snapshot_path(&self, captured_at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}.json", captured_at.format(SNAPSHOT_NAME_FORMAT)))
    }

    /// Snapshot files in chronological (lexical) order. A missing archive
    /// directory simply has no snapshots yet.
    pub fn snapshot_paths(&self) -> Result<Vec<PathBuf>, ServiceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ServiceError::ArchiveReadFailure {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Write one immutable snapshot. Fails instead of overwriting if a
    /// snapshot for the same second already exists.
    pub fn append(&self, stations: &[Station], captured_at: DateTime<Utc>) -> Result<PathBuf, ServiceError> {
        let path = self.snapshot_path(captured_at);
        let archive_failure = |source: std::io::Error| ServiceError::ArchiveWriteFailure {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(archive_failure)?;
        let body = serde_json::to_vec(stations).map_err(|e| archive_failure(e.into()))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(archive_failure)?;
        file.write_all(&body).map_err(archive_failure)?;
        file.sync_all().map_err(archive_failure)?;
        Ok(path)
    }

    /// Replay every snapshot into a per-station history index.
    ///
    /// A snapshot that cannot be read or parsed is skipped with a warning;
    /// history is best-effort. Records without a parseable `updatedAt` are
    /// placed at the snapshot's capture time taken from its filename.
    pub fn replay(&self) -> Result<HistoryIndex, ServiceError> {
        let mut by_station: HashMap<String, BTreeMap<DateTime<Utc>, TimeSeriesPoint>> = HashMap::new();

        for path in self.snapshot_paths()? {
            let records = match read_snapshot(&path) {
                Ok(records) => records,
                Err(message) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable snapshot: {}", message);
                    continue;
                }
            };
            let file_time = capture_time_from_path(&path);

            for record in records {
                let Some(captured_at) = record.updated_at().or(file_time) else {
                    continue;
                };
                by_station.entry(record.id).or_default().insert(
                    captured_at,
                    TimeSeriesPoint {
                        captured_at,
                        ready_count: record.ready_count,
                        empty_count: record.empty_count,
                        online: record.online,
                    },
                );
            }
        }

        let series = by_station
            .into_iter()
            .map(|(id, points)| (id, points.into_values().collect()))
            .collect();
        Ok(HistoryIndex { series })
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<ArchivedStation>, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&contents).map_err(|e| e.to_string())
}

/// Capture time encoded in a snapshot filename, if it follows the format.
pub fn capture_time_from_path(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    NaiveDateTime::parse_from_str(stem, SNAPSHOT_NAME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
