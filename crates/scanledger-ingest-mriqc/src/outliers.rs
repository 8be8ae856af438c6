//! Per-metric z-score outlier flags.
//!
//! Flags are descriptive: they add `outlier__<metric>` columns next to the
//! data and never touch the metric values themselves.

use scanledger_model::{MetricValue, Table, IDENTIFIER_COLUMNS, OUTLIER_PREFIX, READ_ERROR_COLUMN};

/// Fewer non-missing values than this makes a z-score meaningless.
pub const MIN_NON_MISSING: usize = 5;

/// Metric columns eligible for flagging: every non-missing cell is a number.
///
/// Identifier columns, the read-error marker and existing flag columns are
/// never candidates; boolean columns are not numeric.
pub fn numeric_columns(table: &Table) -> Vec<String> {
    table
        .columns()
        .iter()
        .filter(|c| {
            !IDENTIFIER_COLUMNS.contains(&c.as_str())
                && c.as_str() != READ_ERROR_COLUMN
                && !c.starts_with(OUTLIER_PREFIX)
        })
        .filter(|c| {
            let Some(values) = table.column_values(c) else {
                return false;
            };
            let mut present = values.iter().filter(|v| !v.is_missing()).peekable();
            present.peek().is_some() && present.all(|v| v.as_f64().is_some())
        })
        .cloned()
        .collect()
}

/// Sample mean and standard deviation (n - 1) of the present values.
fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

/// Return a copy of `table` with one flag column per eligible metric.
///
/// A metric is skipped when it has fewer than `MIN_NON_MISSING` values or a
/// zero (or undefined) standard deviation. Otherwise a row is flagged when
/// `|z| >= z_threshold`; rows missing the metric are never flagged.
pub fn annotate_outliers(table: &Table, z_threshold: f64) -> Table {
    let mut out = table.clone();
    for column in numeric_columns(table) {
        let Some(values) = table.column_values(&column) else {
            continue;
        };
        let cells: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
        let present: Vec<f64> = cells.iter().flatten().copied().collect();
        if present.len() < MIN_NON_MISSING {
            continue;
        }
        // Summation error can leave a tiny nonzero std on a constant column.
        let constant = present.iter().all(|v| *v == present[0]);
        let Some((mean, std)) = mean_std(&present) else {
            continue;
        };
        if constant || std == 0.0 || !std.is_finite() {
            tracing::debug!(column = %column, "skipping zero-variance metric");
            continue;
        }

        let flag_column = format!("{OUTLIER_PREFIX}{column}");
        let flags: Vec<MetricValue> = cells
            .iter()
            .map(|cell| {
                let flagged = cell.is_some_and(|x| ((x - mean) / std).abs() >= z_threshold);
                MetricValue::Bool(flagged)
            })
            .collect();
        out.set_column(&flag_column, flags);
    }
    out
}
