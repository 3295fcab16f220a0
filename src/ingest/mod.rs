/// Remote station directory ingestion.
///
/// Submodules:
/// - `directory`: the `StationDirectory` seam and its blocking HTTP client.
/// - `mapper`: turns one raw detail payload into `StationFields`.

pub mod directory;
pub mod mapper;
