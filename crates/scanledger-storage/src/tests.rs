//! End-to-end tests for snapshots and ledger upserts

use super::*;
use scanledger_model::MetricValue;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn test_reports() -> (GroupReports, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        reports_dir: dir.path().join("weekly_group_reports"),
        lock_timeout: Duration::from_secs(10),
    };
    (GroupReports::new(config), dir)
}

fn batch(rows: &[(&str, &str, f64)]) -> Table {
    let mut table = Table::new(["participant_id", "file_name", "source_json", "snr"]);
    for (pid, file, snr) in rows {
        table.push_row(vec![
            MetricValue::text(*pid),
            MetricValue::text(*file),
            MetricValue::text(format!("/deriv/sub-{pid}/func/{file}")),
            MetricValue::Number(*snr),
        ]);
    }
    table
}

#[test]
fn test_first_upsert_creates_the_ledger() {
    let (reports, _dir) = test_reports();
    let outcome = reports
        .upsert_ledger(
            Cohort::Baseline,
            Modality::Bold,
            &batch(&[("1001", "sub-1001_task-rest_bold.json", 40.0)]),
        )
        .unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.rows, 1);
    assert!(reports.ledger_path(Cohort::Baseline, Modality::Bold).exists());
}

#[test]
fn test_upsert_is_byte_identical_when_repeated() {
    let (reports, _dir) = test_reports();
    let path = reports.ledger_path(Cohort::Baseline, Modality::T1w);
    reports
        .upsert_ledger(
            Cohort::Baseline,
            Modality::T1w,
            &batch(&[("1001", "sub-1001_T1w.json", 1.5), ("1003", "sub-1003_T1w.json", 0.1)]),
        )
        .unwrap();

    let next = batch(&[("1002", "sub-1002_T1w.json", 2.25), ("1001", "sub-1001_T1w.json", 1.75)]);
    reports.upsert_ledger(Cohort::Baseline, Modality::T1w, &next).unwrap();
    let first = fs::read(&path).unwrap();
    reports.upsert_ledger(Cohort::Baseline, Modality::T1w, &next).unwrap();
    let second = fs::read(&path).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_new_batch_supersedes_only_its_own_keys() {
    let (reports, _dir) = test_reports();
    reports
        .upsert_ledger(
            Cohort::Scan2,
            Modality::Bold,
            &batch(&[
                ("10011", "sub-10011_task-rest_bold.json", 10.0),
                ("10011", "sub-10011_task-ta_bold.json", 11.0),
                ("10021", "sub-10021_task-rest_bold.json", 12.0),
            ]),
        )
        .unwrap();

    let outcome = reports
        .upsert_ledger(
            Cohort::Scan2,
            Modality::Bold,
            &batch(&[("10011", "sub-10011_task-rest_bold.json", 99.0)]),
        )
        .unwrap();
    assert_eq!(outcome.superseded, 1);
    assert_eq!(outcome.rows, 3);

    let ledger = reports.load_ledger(Cohort::Scan2, Modality::Bold).unwrap().unwrap();
    let rows: Vec<(String, String, String)> = ledger
        .rows()
        .iter()
        .map(|r| (r[0].render(), r[1].render(), r[3].render()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("10011".into(), "sub-10011_task-rest_bold.json".into(), "99".into()),
            ("10011".into(), "sub-10011_task-ta_bold.json".into(), "11".into()),
            ("10021".into(), "sub-10021_task-rest_bold.json".into(), "12".into()),
        ]
    );
}

#[test]
fn test_new_columns_are_added_without_losing_old_ones() {
    let (reports, _dir) = test_reports();
    reports
        .upsert_ledger(
            Cohort::Baseline,
            Modality::T1w,
            &batch(&[("1001", "sub-1001_T1w.json", 1.0)]),
        )
        .unwrap();

    let mut wider = batch(&[("1002", "sub-1002_T1w.json", 2.0)]);
    wider.set_column("outlier__snr", vec![MetricValue::Bool(false)]);
    reports.upsert_ledger(Cohort::Baseline, Modality::T1w, &wider).unwrap();

    let ledger = reports.load_ledger(Cohort::Baseline, Modality::T1w).unwrap().unwrap();
    assert_eq!(
        ledger.columns(),
        ["participant_id", "file_name", "source_json", "snr", "outlier__snr"]
    );
    assert_eq!(ledger.cell(0, "outlier__snr"), Some(&MetricValue::Missing));
    assert_eq!(ledger.cell(1, "outlier__snr"), Some(&MetricValue::Bool(false)));
}

#[test]
fn test_concurrent_upserts_lose_nothing() {
    let (reports, _dir) = test_reports();
    let reports = Arc::new(reports);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let reports = Arc::clone(&reports);
            thread::spawn(move || {
                let label = format!("{}", 1001 + i);
                let file = format!("sub-{label}_T1w.json");
                reports
                    .upsert_ledger(
                        Cohort::Baseline,
                        Modality::T1w,
                        &batch(&[(label.as_str(), file.as_str(), i as f64)]),
                    )
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ledger = reports.load_ledger(Cohort::Baseline, Modality::T1w).unwrap().unwrap();
    assert_eq!(ledger.len(), 8);
}

#[test]
fn test_snapshot_is_never_merged() {
    let (reports, _dir) = test_reports();
    let date = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();
    reports
        .upsert_ledger(
            Cohort::Baseline,
            Modality::Bold,
            &batch(&[("1001", "sub-1001_task-rest_bold.json", 40.0)]),
        )
        .unwrap();

    let this_run = batch(&[("1002", "sub-1002_task-rest_bold.json", 41.0)]);
    let path = reports
        .write_snapshot(Cohort::Baseline, Modality::Bold, date, &this_run)
        .unwrap();
    assert!(path.ends_with("baseline_bold_2026-01-04.tsv"));

    let snapshot = reports
        .load_snapshot(Cohort::Baseline, Modality::Bold, date)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.cell(0, "participant_id").unwrap().render(), "1002");

    let ledger = reports.load_ledger(Cohort::Baseline, Modality::Bold).unwrap().unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.cell(0, "participant_id").unwrap().render(), "1001");
}
