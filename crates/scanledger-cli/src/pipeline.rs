//! Pipeline stages over one `PipelineConfig`.
//!
//! ```text
//! audit      acquisition tree + QC evidence -> presence CSV + missing-scan report
//! targets    presence CSVs                  -> subjects with no QC output
//! aggregate  IQM documents                  -> dated snapshot + ledger upsert
//! report     snapshot + ledger              -> trend report
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use scanledger_ingest_bids::{
    audit_cohort, discover_subjects, load_presence_tables, subjects_needing_qc, CohortAudit,
    ScanPatterns,
};
use scanledger_ingest_mriqc::{
    aggregate_iqms, annotate_outliers, default_metrics, ArtifactIndex, QcEvaluator,
    TabularEvidence, TrendReport,
};
use scanledger_model::delimited::COMMA;
use scanledger_model::{split_by_cohort, Cohort, Modality, PipelineConfig, SubjectId, Table};
use scanledger_storage::{write_table_atomic, GroupReports, UpsertOutcome, DATE_FORMAT};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

// ============================================================================
// Audit
// ============================================================================

pub struct AuditRun {
    pub audits: Vec<CohortAudit>,
    /// The report-artifact listing was unavailable; status used tabular evidence only.
    pub degraded: bool,
}

pub fn load_evaluator(config: &PipelineConfig) -> Result<QcEvaluator> {
    let tabular = TabularEvidence::load(
        &config.evidence_table(Modality::T1w),
        &config.evidence_table(Modality::Bold),
    )?;
    let artifacts = ArtifactIndex::build(&config.mriqc_derivatives_dir(), config.artifact_timeout());
    Ok(QcEvaluator::new(tabular, artifacts))
}

/// Scan both cohorts and write their presence tables and missing-scan reports.
pub fn run_audit(config: &PipelineConfig) -> Result<AuditRun> {
    let discovered = discover_subjects(&config.bids_folder)
        .with_context(|| format!("failed to list subjects in {}", config.bids_folder.display()))?;
    tracing::info!(
        baseline = discovered.baseline.len(),
        scan2 = discovered.scan2.len(),
        "discovered subjects"
    );
    let evaluator = load_evaluator(config)?;

    fs::create_dir_all(&config.base_folder)
        .with_context(|| format!("failed to create {}", config.base_folder.display()))?;

    let mut audits = Vec::new();
    for cohort in Cohort::ALL {
        let audit = audit_cohort(
            &config.bids_folder,
            cohort,
            discovered.cohort(cohort),
            ScanPatterns::standard(),
            |subject| evaluator.status(subject),
        );

        let csv = config.scan_presence_csv(cohort);
        write_table_atomic(&csv, &audit.to_table(), COMMA)?;
        let report = config.missing_scans_report(cohort);
        fs::write(&report, audit.render_missing_report())
            .with_context(|| format!("failed to write {}", report.display()))?;
        tracing::info!(
            cohort = %cohort,
            subjects = audit.rows.len(),
            failures = audit.failures.len(),
            csv = %csv.display(),
            "presence table written"
        );
        audits.push(audit);
    }

    Ok(AuditRun {
        audits,
        degraded: evaluator.is_degraded(),
    })
}

/// Subjects whose presence row says no QC output exists, read back from the
/// presence CSVs of both cohorts. Both files are required.
pub fn select_qc_targets(config: &PipelineConfig) -> Result<Vec<SubjectId>> {
    let paths: Vec<PathBuf> = Cohort::ALL
        .iter()
        .map(|c| config.scan_presence_csv(*c))
        .collect();
    let tables = load_presence_tables(&paths)?;

    let mut seen = HashSet::new();
    Ok(tables
        .iter()
        .flat_map(subjects_needing_qc)
        .filter(|s| seen.insert(s.clone()))
        .collect())
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Explicit subjects; `None` aggregates everything found.
    pub labels: Option<Vec<String>>,
    /// `None` disables outlier flags.
    pub z_threshold: Option<f64>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub cohort: Cohort,
    pub modality: Modality,
    pub rows: usize,
    pub snapshot: PathBuf,
    pub ledger: UpsertOutcome,
}

/// Which cohorts to aggregate and with which subject filter.
///
/// Without labels every cohort is aggregated unfiltered. With labels, each
/// cohort only gets its own labels and a cohort with none is skipped, so a
/// baseline-only run never touches the scan2 ledgers.
pub fn cohort_filters(labels: Option<&[String]>) -> Result<Vec<(Cohort, Option<Vec<SubjectId>>)>> {
    let Some(labels) = labels else {
        return Ok(Cohort::ALL.iter().map(|c| (*c, None)).collect());
    };
    let (baseline, scan2) = split_by_cohort(labels)?;
    Ok([(Cohort::Baseline, baseline), (Cohort::Scan2, scan2)]
        .into_iter()
        .filter(|(cohort, ids)| {
            if ids.is_empty() {
                tracing::info!(cohort = %cohort, "no subjects given for cohort; skipping");
            }
            !ids.is_empty()
        })
        .map(|(cohort, ids)| (cohort, Some(ids)))
        .collect())
}

pub fn run_aggregate(
    config: &PipelineConfig,
    reports: &GroupReports,
    options: &AggregateOptions,
) -> Result<Vec<PairOutcome>> {
    let deriv = config.mriqc_derivatives_dir();
    let mut outcomes = Vec::new();

    for (cohort, labels) in cohort_filters(options.labels.as_deref())? {
        for modality in Modality::ALL {
            let batch = aggregate_iqms(&deriv, modality, cohort, labels.as_deref())
                .with_context(|| format!("failed to read {}", deriv.display()))?;
            if batch.is_empty() {
                tracing::warn!(cohort = %cohort, modality = %modality, "no IQM rows; nothing written");
                continue;
            }
            let batch = match options.z_threshold {
                Some(z) => annotate_outliers(&batch, z),
                None => batch,
            };

            let snapshot = reports.write_snapshot(cohort, modality, options.date, &batch)?;
            let ledger = reports.upsert_ledger(cohort, modality, &batch)?;
            outcomes.push(PairOutcome {
                cohort,
                modality,
                rows: batch.len(),
                snapshot,
                ledger,
            });
        }
    }
    Ok(outcomes)
}

// ============================================================================
// Trend report
// ============================================================================

pub fn trend_report_path(reports: &GroupReports, date: NaiveDate) -> PathBuf {
    reports
        .dir()
        .join(format!("qc_trend_report_{}.txt", date.format(DATE_FORMAT)))
}

/// Compare the snapshot of `date` with the ledger for every pair that has
/// either file, and write the rendered report next to them.
pub fn run_report(reports: &GroupReports, date: NaiveDate) -> Result<(TrendReport, PathBuf)> {
    let mut report = TrendReport::new(date.format(DATE_FORMAT).to_string());
    for cohort in Cohort::ALL {
        for modality in Modality::ALL {
            let snapshot = reports.load_snapshot(cohort, modality, date)?;
            let ledger = reports.load_ledger(cohort, modality)?;
            if snapshot.is_none() && ledger.is_none() {
                continue;
            }
            report.add_pair(
                cohort,
                modality,
                &snapshot.unwrap_or_default(),
                &ledger.unwrap_or_else(Table::default),
                default_metrics(modality),
            );
        }
    }

    let path = trend_report_path(reports, date);
    fs::create_dir_all(reports.dir())
        .with_context(|| format!("failed to create {}", reports.dir().display()))?;
    fs::write(&path, report.render())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok((report, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanledger_storage::StorageConfig;
    use std::path::Path;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn write_iqm(config: &PipelineConfig, label: &str, modality: Modality, file: &str, body: &str) {
        let path = config
            .mriqc_derivatives_dir()
            .join(format!("sub-{label}"))
            .join(modality.derivatives_subdir())
            .join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn setup() -> (PipelineConfig, GroupReports, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::new(dir.path().join("bids"), dir.path().join("qc"));
        let reports = GroupReports::new(StorageConfig::from(&config));
        (config, reports, dir)
    }

    #[test]
    fn audit_writes_presence_and_report_for_both_cohorts() {
        let (config, _reports, _dir) = setup();
        touch(&config.bids_folder.join("sub-1001/dwi/sub-1001_dwi.nii.gz"));
        touch(&config.bids_folder.join("sub-10011/func/sub-10011_task-rest_bold.nii.gz"));
        fs::create_dir_all(&config.base_folder).unwrap();
        fs::write(
            config.evidence_table(Modality::Bold),
            "bids_name\tsnr\nsub-10011_task-rest_bold\t40\n",
        )
        .unwrap();

        let run = run_audit(&config).unwrap();
        assert!(run.degraded);
        assert_eq!(run.audits.len(), 2);

        let baseline = fs::read_to_string(config.scan_presence_csv(Cohort::Baseline)).unwrap();
        assert_eq!(
            baseline,
            "ID,hippocampus,dwi,resting_state,think_aloud,minds_eye,MRIQC\nsub-1001,0,1,0,0,0,0\n"
        );
        let scan2 = fs::read_to_string(config.scan_presence_csv(Cohort::Scan2)).unwrap();
        assert!(scan2.ends_with("sub-10011,0,0,1,0,0,no_t1\n"));
        assert!(config.missing_scans_report(Cohort::Scan2).exists());

        assert_eq!(
            select_qc_targets(&config).unwrap(),
            vec![SubjectId::parse("1001").unwrap()]
        );
    }

    #[test]
    fn targets_require_both_presence_tables() {
        let (config, _reports, _dir) = setup();
        assert!(select_qc_targets(&config).is_err());
    }

    #[test]
    fn explicit_labels_skip_cohorts_without_subjects() {
        let labels = vec!["sub-1001".to_string(), "1002".to_string()];
        let filters = cohort_filters(Some(&labels[..])).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].0, Cohort::Baseline);

        assert_eq!(cohort_filters(None).unwrap().len(), 2);
        assert!(cohort_filters(Some(&["12".to_string()][..])).is_err());
    }

    #[test]
    fn aggregate_writes_snapshot_and_ledger_then_reports() {
        let (config, reports, _dir) = setup();
        write_iqm(&config, "1001", Modality::T1w, "sub-1001_T1w.json", r#"{"cjv": 0.4, "cnr": 3.1}"#);
        write_iqm(&config, "1002", Modality::T1w, "sub-1002_T1w.json", r#"{"cjv": 0.5, "cnr": 2.9}"#);
        write_iqm(&config, "10011", Modality::T1w, "sub-10011_T1w.json", r#"{"cjv": 0.6}"#);
        let date = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();

        let options = AggregateOptions {
            labels: Some(vec!["1001".into(), "1002".into()]),
            z_threshold: Some(3.0),
            date,
        };
        let outcomes = run_aggregate(&config, &reports, &options).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].rows, 2);
        assert!(outcomes[0].ledger.created);
        assert!(!reports.ledger_path(Cohort::Scan2, Modality::T1w).exists());

        let ledger_path = reports.ledger_path(Cohort::Baseline, Modality::T1w);
        let first = fs::read(&ledger_path).unwrap();
        run_aggregate(&config, &reports, &options).unwrap();
        assert_eq!(fs::read(&ledger_path).unwrap(), first);

        let (report, path) = run_report(&reports, date).unwrap();
        assert_eq!(report.panels.len(), 1);
        assert!(fs::read_to_string(path)
            .unwrap()
            .starts_with("====== QC Trend Report (2026-01-04) ======"));
    }
}
