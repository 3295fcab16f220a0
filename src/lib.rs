//! Bike-share station tracker.
//!
//! Polls a remote station directory, reconciles each station into a
//! canonical current-state file for the map front-end, archives one
//! snapshot per cycle, and charts per-station availability history
//! replayed from that archive.

pub mod analysis;
pub mod archive;
pub mod config;
pub mod daemon;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod persist;
pub mod stations;
