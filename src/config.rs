/// Runtime configuration for the station tracker.
///
/// Loaded from a TOML file (`bysykkel.toml` by default). Every key has a
/// default, and a missing file means "all defaults", so the service can run
/// against the public directory without any configuration at all.
///
/// Environment overrides (read after `.env` is loaded by the binary):
/// - `BYSYKKEL_DIRECTORY_URL` – directory base URL
/// - `BYSYKKEL_CURRENT_STATE` – path of the published current-state file
/// - `BYSYKKEL_ARCHIVE_DIR` – snapshot archive directory

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::model::ServiceError;

pub const DEFAULT_CONFIG_PATH: &str = "./bysykkel.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub list_path: String,
    pub detail_path: String,
    /// Deadline of every single directory call.
    pub timeout_seconds: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://smartbikeportal.clearchannel.no/public/mobapp/maq.asmx".to_string(),
            list_path: "getRacks".to_string(),
            detail_path: "getRack".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between successive per-station detail fetches.
    pub pacing_seconds: u64,
    /// Sleep between the end of one cycle and the start of the next.
    pub interval_seconds: u64,
    /// Stop after this many cycles. Unset runs until the process is killed.
    pub max_cycles: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            pacing_seconds: 3,
            interval_seconds: 10,
            max_cycles: None,
        }
    }
}

impl PollingConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub current_state_path: PathBuf,
    pub archive_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            current_state_path: PathBuf::from("stations.json"),
            archive_dir: PathBuf::from("archive"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub base_url: String,
    /// Canvas size as `WIDTHxHEIGHT` pixels.
    pub size: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chart.googleapis.com/chart".to_string(),
            size: "400x150".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Optional file that receives a copy of every log line.
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub directory: DirectoryConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
    pub chart: ChartConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Read and parse a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ServiceError::Configuration(format!(
                    "unable to read config file {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        Self::from_toml(&contents).map_err(|e| match e {
            ServiceError::Configuration(msg) => {
                ServiceError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ServiceError> {
        toml::from_str(contents)
            .map_err(|e| ServiceError::Configuration(format!("failed to parse config: {}", e)))
    }

    /// Apply `BYSYKKEL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BYSYKKEL_DIRECTORY_URL") {
            self.directory.base_url = url;
        }
        if let Some(path) = lookup("BYSYKKEL_CURRENT_STATE") {
            self.storage.current_state_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("BYSYKKEL_ARCHIVE_DIR") {
            self.storage.archive_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.directory.base_url.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "directory.base_url must not be empty".into(),
            ));
        }
        if self.directory.timeout_seconds == 0 {
            return Err(ServiceError::Configuration(
                "directory.timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.polling.interval_seconds == 0 {
            return Err(ServiceError::Configuration(
                "polling.interval_seconds must be greater than zero".into(),
            ));
        }
        if self.polling.max_cycles == Some(0) {
            return Err(ServiceError::Configuration(
                "polling.max_cycles must be greater than zero when set".into(),
            ));
        }
        if !is_canvas_size(&self.chart.size) {
            return Err(ServiceError::Configuration(format!(
                "chart.size must look like WIDTHxHEIGHT, got {:?}",
                self.chart.size
            )));
        }
        Ok(())
    }

    /// Log the loaded configuration.
    pub fn log_config(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  directory     : {}", self.directory.base_url);
        tracing::info!("  timeout       : {}s", self.directory.timeout_seconds);
        tracing::info!("  pacing        : {}s", self.polling.pacing_seconds);
        tracing::info!("  interval      : {}s", self.polling.interval_seconds);
        tracing::info!("  current state : {}", self.storage.current_state_path.display());
        tracing::info!("  archive       : {}", self.storage.archive_dir.display());
    }
}

fn is_canvas_size(size: &str) -> bool {
    match size.split_once('x') {
        Some((w, h)) => {
            w.parse::<u32>().is_ok_and(|w| w > 0) && h.parse::<u32>().is_ok_and(|h| h > 0)
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
