//! Period-over-period summaries: this run's dated snapshot against the full
//! ledger, per cohort and panel.
//!
//! T1w rows form one panel. BOLD rows are split by task marker in the file
//! name (resting state vs think-aloud), case-insensitively.

use std::fmt::Write as _;

use scanledger_model::{Cohort, MetricValue, Modality, Table, FILE_NAME_COLUMN};

const T1_METRICS: [&str; 3] = ["cjv", "cnr", "qi_2"];
const BOLD_METRICS: [&str; 3] = ["fd_mean", "snr", "dvars_nstd"];

/// Metrics summarized when the caller does not choose any.
pub fn default_metrics(modality: Modality) -> &'static [&'static str] {
    match modality {
        Modality::T1w => &T1_METRICS,
        Modality::Bold => &BOLD_METRICS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelKind {
    T1w,
    Rest,
    ThinkAloud,
}

impl PanelKind {
    pub fn for_modality(modality: Modality) -> &'static [PanelKind] {
        match modality {
            Modality::T1w => &[PanelKind::T1w],
            Modality::Bold => &[PanelKind::Rest, PanelKind::ThinkAloud],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PanelKind::T1w => "T1w",
            PanelKind::Rest => "rest",
            PanelKind::ThinkAloud => "think-aloud",
        }
    }

    fn file_marker(self) -> Option<&'static str> {
        match self {
            PanelKind::T1w => None,
            PanelKind::Rest => Some("rest"),
            PanelKind::ThinkAloud => Some("task-ta"),
        }
    }

    /// Rows of `table` belonging to this panel.
    pub fn select(self, table: &Table) -> Table {
        let Some(marker) = self.file_marker() else {
            return table.clone();
        };
        table.filter_rows(|t, row| {
            t.cell(row, FILE_NAME_COLUMN)
                .map(|name| name.render().to_lowercase().contains(marker))
                .unwrap_or(false)
        })
    }
}

/// Count, mean and median of one metric's numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

impl SeriesStats {
    pub fn of_column(table: &Table, metric: &str) -> Self {
        let mut values: Vec<f64> = table
            .column_values(metric)
            .unwrap_or_default()
            .into_iter()
            .filter_map(MetricValue::as_numeric)
            .collect();
        Self::of_values(&mut values)
    }

    fn of_values(values: &mut [f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        Self {
            count: n,
            mean: Some(mean),
            median: Some(median),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub metric: String,
    pub snapshot: SeriesStats,
    pub ledger: SeriesStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelSummary {
    pub cohort: Cohort,
    pub kind: PanelKind,
    pub snapshot_rows: usize,
    pub ledger_rows: usize,
    pub metrics: Vec<MetricSummary>,
}

impl PanelSummary {
    pub fn build(
        cohort: Cohort,
        kind: PanelKind,
        snapshot: &Table,
        ledger: &Table,
        metrics: &[&str],
    ) -> Self {
        let snapshot = kind.select(snapshot);
        let ledger = kind.select(ledger);
        Self {
            cohort,
            kind,
            snapshot_rows: snapshot.len(),
            ledger_rows: ledger.len(),
            metrics: metrics
                .iter()
                .map(|m| MetricSummary {
                    metric: m.to_string(),
                    snapshot: SeriesStats::of_column(&snapshot, m),
                    ledger: SeriesStats::of_column(&ledger, m),
                })
                .collect(),
        }
    }
}

/// Plain-text trend report for one run date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrendReport {
    pub date: String,
    pub panels: Vec<PanelSummary>,
}

impl TrendReport {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            panels: Vec::new(),
        }
    }

    /// Add every panel of one (cohort, modality) pair.
    pub fn add_pair(
        &mut self,
        cohort: Cohort,
        modality: Modality,
        snapshot: &Table,
        ledger: &Table,
        metrics: &[&str],
    ) {
        for kind in PanelKind::for_modality(modality) {
            self.panels
                .push(PanelSummary::build(cohort, *kind, snapshot, ledger, metrics));
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("====== QC Trend Report ({}) ======\n", self.date);
        for panel in &self.panels {
            let _ = writeln!(
                out,
                "\n{} {} (this run n={}, all runs n={})",
                panel.cohort,
                panel.kind.label(),
                panel.snapshot_rows,
                panel.ledger_rows
            );
            for metric in &panel.metrics {
                let _ = writeln!(
                    out,
                    "  {:<12} this run {} | all runs {}",
                    metric.metric,
                    fmt_stats(&metric.snapshot),
                    fmt_stats(&metric.ledger)
                );
            }
        }
        out
    }
}

fn fmt_stats(stats: &SeriesStats) -> String {
    match (stats.mean, stats.median) {
        (Some(mean), Some(median)) => {
            format!("n={} mean={mean:.4} median={median:.4}", stats.count)
        }
        _ => "n=0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use scanledger_model::PARTICIPANT_ID_COLUMN;

    fn bold_table(rows: &[(&str, &str, f64)]) -> Table {
        let mut table = Table::new([PARTICIPANT_ID_COLUMN, FILE_NAME_COLUMN, "snr"]);
        for (pid, file, snr) in rows {
            table.push_row(vec![
                MetricValue::text(*pid),
                MetricValue::text(*file),
                MetricValue::Number(*snr),
            ]);
        }
        table
    }

    #[test]
    fn stats_count_numbers_kept_as_text_on_read_back() {
        let table = scanledger_model::delimited::parse(
            "participant_id\tfile_name\tcnr\n\
             1001\tsub-1001_T1w.json\t3.0\n\
             1002\tsub-1002_T1w.json\t2.5\n\
             1003\tsub-1003_T1w.json\t1e-05\n\
             1004\tsub-1004_T1w.json\tn/a\n",
            '\t',
        )
        .unwrap();
        assert_eq!(table.cell(0, "cnr"), Some(&MetricValue::text("3.0")));

        let stats = SeriesStats::of_column(&table, "cnr");
        assert_eq!(stats.count, 3);
        assert_relative_eq!(stats.mean.unwrap(), (3.0 + 2.5 + 1e-05) / 3.0);
        assert_relative_eq!(stats.median.unwrap(), 2.5);
    }

    #[test]
    fn bold_rows_split_by_task() {
        let table = bold_table(&[
            ("1001", "sub-1001_task-rest_bold.json", 40.0),
            ("1001", "sub-1001_task-TA_run-1_bold.json", 30.0),
            ("1002", "sub-1002_task-ta_bold.json", 32.0),
            ("1002", "sub-1002_task-me_bold.json", 20.0),
        ]);
        assert_eq!(PanelKind::Rest.select(&table).len(), 1);
        assert_eq!(PanelKind::ThinkAloud.select(&table).len(), 2);
        assert_eq!(PanelKind::T1w.select(&table).len(), 4);
    }

    #[test]
    fn stats_ignore_missing_and_text() {
        let mut table = bold_table(&[
            ("1001", "a", 1.0),
            ("1002", "b", 4.0),
            ("1003", "c", 2.0),
        ]);
        table.push_named([("snr", MetricValue::Missing)]);
        table.push_named([("snr", MetricValue::text("n/a"))]);

        let stats = SeriesStats::of_column(&table, "snr");
        assert_eq!(stats.count, 3);
        assert_relative_eq!(stats.mean.unwrap(), 7.0 / 3.0);
        assert_relative_eq!(stats.median.unwrap(), 2.0);
        assert_eq!(SeriesStats::of_column(&table, "absent"), SeriesStats::default());
    }

    #[test]
    fn even_count_median_averages_the_middle() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        let stats = SeriesStats::of_values(&mut values);
        assert_relative_eq!(stats.median.unwrap(), 2.5);
    }

    #[test]
    fn report_lists_every_panel() {
        let snapshot = bold_table(&[("1003", "sub-1003_task-rest_bold.json", 50.0)]);
        let ledger = bold_table(&[
            ("1001", "sub-1001_task-rest_bold.json", 40.0),
            ("1003", "sub-1003_task-rest_bold.json", 50.0),
        ]);
        let mut report = TrendReport::new("2026-01-04");
        report.add_pair(Cohort::Baseline, Modality::Bold, &snapshot, &ledger, &["snr"]);

        assert_eq!(report.panels.len(), 2);
        let text = report.render();
        assert!(text.starts_with("====== QC Trend Report (2026-01-04) ======\n"));
        assert!(text.contains("baseline rest (this run n=1, all runs n=2)"));
        assert!(text.contains("baseline think-aloud (this run n=0, all runs n=0)"));
        assert!(text.contains("this run n=1 mean=50.0000 median=50.0000 | all runs n=2 mean=45.0000"));
    }
}
