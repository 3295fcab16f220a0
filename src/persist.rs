/// Publishing of the current-state file and archive snapshots.
///
/// The current-state file is read concurrently by the map front-end, so it
/// is only ever replaced whole: the new contents go to `<path>.new`, are
/// synced, and then renamed over the old file. A reader sees either the
/// previous or the new array, never a partial write.
///
/// Failing to publish the current state is fatal. Failing to archive a
/// snapshot only loses that cycle's history.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::archive::{ArchiveStore, ArchivedStation};
use crate::model::{ServiceError, Station};
use crate::stations::StationRegistry;

#[derive(Debug, Clone)]
pub struct Persister {
    current_state_path: PathBuf,
    archive: ArchiveStore,
}

impl Persister {
    pub fn new(current_state_path: impl Into<PathBuf>, archive: ArchiveStore) -> Self {
        Self {
            current_state_path: current_state_path.into(),
            archive,
        }
    }

    pub fn current_state_path(&self) -> &Path {
        &self.current_state_path
    }

    pub fn archive_store(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Atomically replace the current-state file with the whole registry.
    pub fn publish(&self, registry: &StationRegistry) -> Result<(), ServiceError> {
        let stations = registry.snapshot();
        let body = serde_json::to_vec(&stations).map_err(|e| ServiceError::PersistenceFailure {
            path: self.current_state_path.clone(),
            source: e.into(),
        })?;
        write_atomically(&self.current_state_path, &body).map_err(|source| {
            ServiceError::PersistenceFailure {
                path: self.current_state_path.clone(),
                source,
            }
        })
    }

    /// Append one immutable archive snapshot of the whole registry.
    pub fn archive(&self, registry: &StationRegistry, captured_at: DateTime<Utc>) -> Result<PathBuf, ServiceError> {
        self.archive.append(&registry.snapshot(), captured_at)
    }
}

/// Write `body` to a sibling temporary file and rename it over `path`.
pub fn write_atomically(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".new");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(body)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}

/// Read a previously published current-state file for startup seeding.
///
/// A missing file means a first run and yields no stations. A file that
/// exists but cannot be read or parsed is a persistence failure: the
/// service refuses to start rather than overwrite it with an empty fleet.
/// Individual records without coordinates or a parseable timestamp are
/// skipped.
pub fn load_current_state(path: &Path) -> Result<Vec<Station>, ServiceError> {
    let persistence_failure = |source: std::io::Error| ServiceError::PersistenceFailure {
        path: path.to_path_buf(),
        source,
    };

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(persistence_failure(e)),
    };
    let records: Vec<ArchivedStation> =
        serde_json::from_str(&contents).map_err(|e| persistence_failure(e.into()))?;

    let stations = records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            let station = record.into_station();
            if station.is_none() {
                tracing::warn!(station = %id, "skipping stored record without position or timestamp");
            }
            station
        })
        .collect();
    Ok(stations)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
