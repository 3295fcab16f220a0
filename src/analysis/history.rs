/// Station availability history downsampling.
///
/// Turns the replayed history of one station into the value/label pair the
/// chart renderer expects: the most recent `MAX_CHART_ENTRIES` points, one
/// integer fullness percentage per point, and a sparse set of `HH:MM` time
/// labels.
///
/// Points whose fullness cannot be computed (missing counts) are left out
/// rather than zero-filled, so a gap in the data never reads as an empty
/// station.

use std::fmt::Display;

use chrono::TimeZone;

use crate::model::TimeSeriesPoint;

/// Number of most recent history entries kept for one chart.
pub const MAX_CHART_ENTRIES: usize = 50;

/// Every `LABEL_STRIDE`-th value carries a time label.
pub const LABEL_STRIDE: usize = 5;

/// Headroom added above the highest value for the y-axis.
pub const Y_AXIS_HEADROOM: u32 = 10;

/// A chart-ready series. `values` and `labels` always have the same,
/// non-zero length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSeries {
    /// Fullness percentages, 0–100, oldest first.
    pub values: Vec<u32>,
    /// Time labels aligned with `values`; most are blank.
    pub labels: Vec<String>,
    /// Upper bound of the y-axis: `max(values) + Y_AXIS_HEADROOM`.
    pub max_value: u32,
}

/// Build a chart series from a station's time-ordered history.
///
/// Returns `None` when there is no history, or when none of the retained
/// points has a computable fullness. Labels are formatted in `tz`.
pub fn build_series<Tz>(points: &[TimeSeriesPoint], tz: &Tz) -> Option<ChartSeries>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if points.is_empty() {
        return None;
    }

    let retained = &points[points.len().saturating_sub(MAX_CHART_ENTRIES)..];
    let usable: Vec<(&TimeSeriesPoint, u32)> = retained
        .iter()
        .filter_map(|point| point.fullness_percent().map(|value| (point, value)))
        .collect();
    if usable.is_empty() {
        return None;
    }

    let values: Vec<u32> = usable.iter().map(|(_, value)| (*value).min(100)).collect();
    let labels = usable
        .iter()
        .enumerate()
        .map(|(index, (point, _))| {
            // The leftmost tick stays blank to keep the axis uncluttered.
            if index != 0 && index % LABEL_STRIDE == 0 {
                point.captured_at.with_timezone(tz).format("%H:%M").to_string()
            } else {
                String::new()
            }
        })
        .collect();
    let max_value = values.iter().copied().max().unwrap_or(0) + Y_AXIS_HEADROOM;

    Some(ChartSeries {
        values,
        labels,
        max_value,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn point(minutes: i64, ready: Option<u32>, empty: Option<u32>) -> TimeSeriesPoint {
        TimeSeriesPoint {
            captured_at: start() + Duration::minutes(minutes),
            ready_count: ready,
            empty_count: empty,
            online: Some(true),
        }
    }

    fn series(len: usize) -> Vec<TimeSeriesPoint> {
        (0..len)
            .map(|i| point(i as i64, Some(i as u32 % 10), Some(10 - i as u32 % 10)))
            .collect()
    }

    // --- No chart -----------------------------------------------------------

    #[test]
    fn test_empty_history_produces_no_chart() {
        assert_eq!(build_series(&[], &Utc), None);
    }

    #[test]
    fn test_history_without_counts_produces_no_chart() {
        let points = vec![point(0, None, Some(3)), point(1, Some(2), None)];
        assert_eq!(build_series(&points, &Utc), None);
    }

    // --- Values -------------------------------------------------------------

    #[test]
    fn test_three_snapshots_produce_floored_percentages_and_blank_labels() {
        // Ratios 0.2, 0.5, 0.8 at increasing timestamps.
        let points = vec![
            point(0, Some(1), Some(4)),
            point(10, Some(1), Some(1)),
            point(20, Some(4), Some(1)),
        ];
        let chart = build_series(&points, &Utc).expect("three usable points should chart");
        assert_eq!(chart.values, vec![20, 50, 80]);
        assert_eq!(chart.labels, vec!["", "", ""], "N=3 has no labelled index");
        assert_eq!(chart.max_value, 90);
    }

    #[test]
    fn test_zero_total_counts_chart_as_zero() {
        let points = vec![point(0, Some(0), Some(0))];
        let chart = build_series(&points, &Utc).unwrap();
        assert_eq!(chart.values, vec![0]);
        assert_eq!(chart.max_value, 10);
    }

    #[test]
    fn test_unavailable_points_are_excluded_not_zero_filled() {
        let points = vec![
            point(0, Some(5), Some(5)),
            point(1, None, None),
            point(2, Some(10), Some(0)),
        ];
        let chart = build_series(&points, &Utc).unwrap();
        assert_eq!(chart.values, vec![50, 100]);
        assert_eq!(chart.labels.len(), chart.values.len());
    }

    #[test]
    fn test_only_most_recent_entries_are_kept() {
        // A full station, older than everything in `series`, which never
        // reaches 100%.
        let mut points = vec![point(-100, Some(10), Some(0))];
        points.extend(series(MAX_CHART_ENTRIES));
        let chart = build_series(&points, &Utc).unwrap();
        assert_eq!(chart.values.len(), MAX_CHART_ENTRIES);
        assert!(!chart.values.contains(&100), "oldest point should have been dropped");
        assert_eq!(&chart.values[..2], &[0, 10]);
    }

    // --- Labels -------------------------------------------------------------

    #[test]
    fn test_every_fifth_label_is_a_time_except_the_first() {
        let chart = build_series(&series(12), &Utc).unwrap();
        assert_eq!(chart.labels.len(), 12);
        assert_eq!(chart.labels[0], "");
        assert_eq!(chart.labels[5], "08:05");
        assert_eq!(chart.labels[10], "08:10");
        for (index, label) in chart.labels.iter().enumerate() {
            if index % LABEL_STRIDE != 0 {
                assert!(label.is_empty(), "label {} should be blank, got {:?}", index, label);
            }
        }
    }

    #[test]
    fn test_non_blank_label_count_for_all_lengths() {
        for len in 1..=MAX_CHART_ENTRIES {
            let chart = build_series(&series(len), &Utc).unwrap();
            let labelled = chart.labels.iter().filter(|l| !l.is_empty()).count();
            // ceil(N/5) multiples of 5, minus index 0 which is forced blank.
            assert_eq!(labelled, len.div_ceil(LABEL_STRIDE) - 1, "length {}", len);
            assert_eq!(chart.values.len(), chart.labels.len());
        }
    }

    #[test]
    fn test_labels_follow_display_timezone() {
        let oslo_summer = FixedOffset::east_opt(2 * 3600).unwrap();
        let chart = build_series(&series(6), &oslo_summer).unwrap();
        assert_eq!(chart.labels[5], "10:05");
    }

    #[test]
    fn test_label_positions_follow_usable_points_only() {
        let mut points = series(7);
        points[1].ready_count = None;
        let chart = build_series(&points, &Utc).unwrap();
        assert_eq!(chart.values.len(), 6);
        // Index 5 of the usable list is the point captured at minute 6.
        assert_eq!(chart.labels[5], "08:06");
    }
}
