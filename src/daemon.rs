/// The poll loop driving the station tracker.
///
/// One cycle walks through:
///   AggregatingStats     replay the archive once into a history index
///   PollingStations      fetch, map, chart and reconcile each listed id,
///                        publishing the current-state file on change
///   SnapshottingArchive  append one snapshot of the whole registry
///   Sleeping             wait for the inter-cycle interval
///
/// Everything runs sequentially on the calling thread. Directory calls are
/// paced so the remote service is never hit faster than one detail request
/// per pacing interval. Per-station failures are logged and skipped; only a
/// failure to publish the current-state file stops the loop.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::analysis::chart::ChartRenderer;
use crate::archive::HistoryIndex;
use crate::config::PollingConfig;
use crate::ingest::directory::StationDirectory;
use crate::ingest::mapper;
use crate::logging;
use crate::model::ServiceError;
use crate::persist::Persister;
use crate::stations::{Reconciliation, StationRegistry};

// ---------------------------------------------------------------------------
// Cycle state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    AggregatingStats,
    PollingStations,
    SnapshottingArchive,
    Sleeping,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Ids returned by the directory listing.
    pub listed: usize,
    /// Stations whose reconciliation triggered a publish.
    pub published: usize,
    /// Stations fetched successfully but unchanged.
    pub unchanged: usize,
    /// Stations skipped because of a timeout, transport or payload error.
    pub failed: usize,
    /// Whether the station listing itself failed.
    pub listing_failed: bool,
    /// Whether this cycle's archive snapshot was written.
    pub archived: bool,
}

/// Timing policy of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub pacing: Duration,
    pub interval: Duration,
    pub max_cycles: Option<u64>,
}

impl From<&PollingConfig> for PollTiming {
    fn from(config: &PollingConfig) -> Self {
        Self {
            pacing: config.pacing(),
            interval: config.interval(),
            max_cycles: config.max_cycles,
        }
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

/// Source of fetch and capture times; `Utc::now` outside of tests.
pub type Clock = Box<dyn Fn() -> DateTime<Utc>>;

pub struct PollLoop<D, C> {
    directory: D,
    chart: C,
    registry: StationRegistry,
    persister: Persister,
    timing: PollTiming,
    clock: Clock,
    state: CycleState,
    cycles: u64,
}

impl<D, C> PollLoop<D, C>
where
    D: StationDirectory,
    C: ChartRenderer,
{
    pub fn new(
        directory: D,
        chart: C,
        registry: StationRegistry,
        persister: Persister,
        timing: PollTiming,
    ) -> Self {
        Self {
            directory,
            chart,
            registry,
            persister,
            timing,
            clock: Box::new(Utc::now),
            state: CycleState::Idle,
            cycles: 0,
        }
    }

    /// Replace the wall clock, e.g. to give every cycle a distinct capture
    /// time in tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    /// Run cycles until `max_cycles` is reached, or forever when unset.
    ///
    /// Returns only on a fatal error or after the last configured cycle.
    pub fn run(&mut self) -> Result<(), ServiceError> {
        loop {
            self.run_cycle()?;

            if self.timing.max_cycles.is_some_and(|max| self.cycles >= max) {
                tracing::info!(cycles = self.cycles, "configured cycle limit reached, stopping");
                return Ok(());
            }

            self.state = CycleState::Sleeping;
            pause(self.timing.interval);
        }
    }

    /// Run one aggregate → poll → snapshot pass. The loop is `Idle` again
    /// once the pass completes.
    pub fn run_cycle(&mut self) -> Result<CycleReport, ServiceError> {
        let cycle = self.cycles + 1;
        let mut report = CycleReport::default();

        self.state = CycleState::AggregatingStats;
        let history = match self.persister.archive_store().replay() {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("archive replay failed, charts unavailable this cycle: {}", e);
                HistoryIndex::default()
            }
        };
        tracing::debug!(cycle, stations = history.station_count(), "history rebuilt");

        self.state = CycleState::PollingStations;
        match self.directory.list_station_ids() {
            Ok(ids) => {
                report.listed = ids.len();
                for (index, station_id) in ids.iter().enumerate() {
                    if index > 0 {
                        pause(self.timing.pacing);
                    }
                    match self.poll_station(station_id, &history) {
                        Ok(outcome) if outcome.publish_required() => report.published += 1,
                        Ok(_) => report.unchanged += 1,
                        Err(e) if e.is_fatal() => {
                            logging::log_station_failure(station_id, "publish", &e);
                            return Err(e);
                        }
                        Err(e) => {
                            logging::log_station_failure(station_id, "poll", &e);
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                logging::log_listing_failure(&e);
                report.listing_failed = true;
            }
        }

        self.state = CycleState::SnapshottingArchive;
        match self.persister.archive(&self.registry, (self.clock)()) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "archive snapshot written");
                report.archived = true;
            }
            Err(e) => tracing::error!("archive snapshot skipped: {}", e),
        }

        self.cycles = cycle;
        self.state = CycleState::Idle;
        logging::log_cycle_summary(
            cycle,
            report.listed,
            report.published,
            report.failed,
            report.listing_failed,
        );
        Ok(report)
    }

    /// Fetch → map → chart → reconcile → (conditional) publish for one id.
    fn poll_station(&mut self, station_id: &str, history: &HistoryIndex) -> Result<Reconciliation, ServiceError> {
        let raw = self.directory.fetch_detail(station_id)?;
        let fetched_at = (self.clock)();
        let fields = mapper::map_rack(&raw)?;

        let graph_url = history
            .chart_for(station_id, &Local)
            .map(|series| self.chart.chart_url(&series));

        let outcome = self.registry.reconcile(station_id, fields, graph_url, fetched_at)?;
        if outcome.publish_required() {
            self.persister.publish(&self.registry)?;
            tracing::info!(station = station_id, ?outcome, "station updated");
        } else {
            tracing::debug!(station = station_id, "station unchanged");
        }
        Ok(outcome)
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::history::ChartSeries;
    use crate::archive::ArchiveStore;
    use crate::ingest::directory::RawRack;
    use serde_json::json;
    use std::cell::RefCell;
    use std::path::PathBuf;

    struct OneStation {
        rack: serde_json::Value,
        calls: RefCell<usize>,
    }

    impl StationDirectory for OneStation {
        fn list_station_ids(&self) -> Result<Vec<String>, ServiceError> {
            Ok(vec!["A".to_string()])
        }

        fn fetch_detail(&self, _station_id: &str) -> Result<RawRack, ServiceError> {
            *self.calls.borrow_mut() += 1;
            Ok(serde_json::from_value(self.rack.clone()).unwrap())
        }
    }

    struct NoCharts;

    impl ChartRenderer for NoCharts {
        fn chart_url(&self, series: &ChartSeries) -> String {
            format!("chart:{}", series.values.len())
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bysykkel-daemon-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn instant_timing(max_cycles: Option<u64>) -> PollTiming {
        PollTiming {
            pacing: Duration::ZERO,
            interval: Duration::ZERO,
            max_cycles,
        }
    }

    #[test]
    fn test_timing_from_config() {
        let timing = PollTiming::from(&PollingConfig::default());
        assert_eq!(timing.pacing, Duration::from_secs(3));
        assert_eq!(timing.interval, Duration::from_secs(10));
        assert_eq!(timing.max_cycles, None);
    }

    #[test]
    fn test_run_stops_after_max_cycles_and_returns_to_idle() {
        let dir = scratch_dir("max-cycles");
        let directory = OneStation {
            rack: json!({"description": "1-A", "latitude": "59.9", "longitude": "10.7",
                         "ready_bikes": "1", "empty_locks": "1", "online": "1"}),
            calls: RefCell::new(0),
        };
        let persister = Persister::new(dir.join("stations.json"), ArchiveStore::new(dir.join("archive")));
        let mut poll_loop = PollLoop::new(directory, NoCharts, StationRegistry::new(), persister, instant_timing(Some(1)));

        assert_eq!(poll_loop.state(), CycleState::Idle);
        poll_loop.run().expect("one clean cycle should not fail");
        assert_eq!(poll_loop.cycles_completed(), 1);
        assert_eq!(poll_loop.state(), CycleState::Idle);
        assert_eq!(*poll_loop.directory.calls.borrow(), 1);
        assert_eq!(poll_loop.registry().get("A").unwrap().description, "A");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_single_cycle_ends_idle() {
        let dir = scratch_dir("single-cycle");
        let directory = OneStation {
            rack: json!({"online": "0"}),
            calls: RefCell::new(0),
        };
        let persister = Persister::new(dir.join("stations.json"), ArchiveStore::new(dir.join("archive")));
        let mut poll_loop = PollLoop::new(directory, NoCharts, StationRegistry::new(), persister, instant_timing(None));

        let report = poll_loop.run_cycle().unwrap();
        assert_eq!(report.failed, 1, "a new station without coordinates is rejected");
        assert!(report.archived);
        assert_eq!(poll_loop.state(), CycleState::Idle);
        let _ = std::fs::remove_dir_all(dir);
    }
}
