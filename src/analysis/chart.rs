/// Chart image URLs for station info-windows.
///
/// The chart itself is drawn by an external image-chart service; this module
/// only encodes a `ChartSeries` into that service's query-string format.
/// The default renderer targets the Google Image Charts line-chart API.

use reqwest::Url;

use crate::analysis::history::ChartSeries;
use crate::config::ChartConfig;
use crate::model::ServiceError;

const LINE_COLOR: &str = "666666";
const LINE_THICKNESS: u32 = 3;
const AXIS_COLOR: &str = "888888";
const AXIS_FONT_SIZE: u32 = 8;

/// Renders a chart series into a displayable image URL.
pub trait ChartRenderer {
    fn chart_url(&self, series: &ChartSeries) -> String;
}

/// Line chart of station fullness over time, without legend.
#[derive(Debug, Clone)]
pub struct GoogleChartRenderer {
    base_url: Url,
    size: String,
}

impl GoogleChartRenderer {
    pub fn new(config: &ChartConfig) -> Result<Self, ServiceError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ServiceError::Configuration(format!("invalid chart base_url {}: {}", config.base_url, e))
        })?;
        Ok(Self {
            base_url,
            size: config.size.clone(),
        })
    }
}

impl ChartRenderer for GoogleChartRenderer {
    fn chart_url(&self, series: &ChartSeries) -> String {
        let values = series
            .values
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let labels = series.labels.join("|");
        let max = series.max_value;

        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("cht", "lc")
            .append_pair("chs", &self.size)
            .append_pair("chd", &format!("t:{}", values))
            .append_pair("chds", &format!("0,{}", max))
            .append_pair("chco", LINE_COLOR)
            .append_pair("chls", &LINE_THICKNESS.to_string())
            .append_pair("chxt", "x,y")
            .append_pair("chxl", &format!("0:|{}", labels))
            .append_pair("chxr", &format!("1,0,{}", max))
            .append_pair(
                "chxs",
                &format!("0,{c},{f}|1,{c},{f}", c = AXIS_COLOR, f = AXIS_FONT_SIZE),
            );
        url.into()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
