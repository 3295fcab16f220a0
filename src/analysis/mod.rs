/// History aggregation and chart construction for station info-windows.
///
/// The archive is replayed once per poll cycle; these helpers turn one
/// station's replayed history into a bounded chart series and then into a
/// chart image URL for the front-end.
///
/// Submodules:
/// - `history`: downsamples a station's history into values and labels.
/// - `chart`: renders a chart series into an image URL.

pub mod chart;
pub mod history;
