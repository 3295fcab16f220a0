//! Entry point for the bike-share station tracker daemon.
//!
//! Startup sequence:
//! - load `.env`, then the TOML config (first argument, `$BYSYKKEL_CONFIG`,
//!   or `./bysykkel.toml`), then `BYSYKKEL_*` overrides
//! - install logging
//! - seed the registry from the previously published current-state file
//! - run the poll loop until the process is terminated
//!
//! Exits non-zero on configuration errors or when the current-state file
//! can no longer be written.

use std::env;

use anyhow::{Context, Result};

use bysykkel_service::analysis::chart::GoogleChartRenderer;
use bysykkel_service::archive::ArchiveStore;
use bysykkel_service::config::{DEFAULT_CONFIG_PATH, ServiceConfig};
use bysykkel_service::daemon::{PollLoop, PollTiming};
use bysykkel_service::ingest::directory::HttpStationDirectory;
use bysykkel_service::logging;
use bysykkel_service::persist::{self, Persister};
use bysykkel_service::stations::StationRegistry;

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("BYSYKKEL_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let mut config = ServiceConfig::load(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;

    logging::init_logging(&config.logging)?;
    tracing::info!("Starting station tracker (config: {})", config_path);
    config.log_config();

    let stations = persist::load_current_state(&config.storage.current_state_path)
        .context("refusing to start with an unreadable current-state file")?;
    tracing::info!("Seeded {} stations from previous run", stations.len());
    let registry = StationRegistry::from_stations(stations);

    let directory = HttpStationDirectory::new(&config.directory)?;
    let chart = GoogleChartRenderer::new(&config.chart)?;
    let persister = Persister::new(
        config.storage.current_state_path.clone(),
        ArchiveStore::new(config.storage.archive_dir.clone()),
    );

    let mut poll_loop = PollLoop::new(
        directory,
        chart,
        registry,
        persister,
        PollTiming::from(&config.polling),
    );

    if let Err(e) = poll_loop.run() {
        tracing::error!("Poll loop stopped: {}", e);
        return Err(e).context("current state can no longer be published");
    }
    Ok(())
}
