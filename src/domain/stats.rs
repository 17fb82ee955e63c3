//! Per-page class statistics.
//!
//! Statistics only ever cover the rows of a single page. Ungraded rows are
//! skipped entirely; they never count as zero.

use serde::Serialize;

use super::entities::ClassListRow;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ClassStats {
    /// Mean of graded rows; `None` when no row on the page is graded.
    pub average: Option<f64>,
    /// Mean weighted by subject units over graded rows with positive units.
    pub weighted_average: Option<f64>,
    pub above_average: usize,
    pub below_average: usize,
    pub graded: usize,
    pub enrolled: usize,
}

/// Compute statistics for the rows of one page.
///
/// A grade exactly equal to the mean is neither above nor below it.
pub fn compute_stats(rows: &[ClassListRow]) -> ClassStats {
    let graded: Vec<(f64, i32)> = rows
        .iter()
        .filter_map(|row| row.graded_value().map(|value| (value, row.units)))
        .collect();

    let enrolled = rows.len();
    if graded.is_empty() {
        return ClassStats {
            enrolled,
            ..ClassStats::default()
        };
    }

    let average = graded.iter().map(|(value, _)| value).sum::<f64>() / graded.len() as f64;
    let above_average = graded.iter().filter(|(value, _)| *value > average).count();
    let below_average = graded.iter().filter(|(value, _)| *value < average).count();

    let (weighted_sum, total_units) = graded
        .iter()
        .filter(|(_, units)| *units > 0)
        .fold((0.0_f64, 0_i64), |(sum, units), (value, row_units)| {
            (
                sum + value * f64::from(*row_units),
                units + i64::from(*row_units),
            )
        });
    let weighted_average = (total_units > 0).then(|| weighted_sum / total_units as f64);

    ClassStats {
        average: Some(average),
        weighted_average,
        above_average,
        below_average,
        graded: graded.len(),
        enrolled,
    }
}

/// Round to two decimals for display.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
