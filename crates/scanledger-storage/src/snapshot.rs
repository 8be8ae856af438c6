//! Dated snapshots and canonical ledger file naming.
//!
//! ```text
//! weekly_group_reports/
//!   baseline_T1w_2026-01-04.tsv   this run's batch, never merged
//!   baseline_T1w.tsv              canonical ledger
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use scanledger_model::delimited::TAB;
use scanledger_model::{Cohort, Modality, Table};

use crate::table_io::{write_table_atomic, TableIoError};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn canonical_ledger_path(dir: &Path, cohort: Cohort, modality: Modality) -> PathBuf {
    dir.join(format!("{}_{}.tsv", cohort.as_str(), modality.file_token()))
}

pub fn dated_snapshot_path(
    dir: &Path,
    cohort: Cohort,
    modality: Modality,
    date: NaiveDate,
) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.tsv",
        cohort.as_str(),
        modality.file_token(),
        date.format(DATE_FORMAT)
    ))
}

/// Write this run's batch as a dated snapshot, replacing any earlier
/// snapshot from the same day.
pub fn write_dated_snapshot(
    dir: &Path,
    cohort: Cohort,
    modality: Modality,
    date: NaiveDate,
    table: &Table,
) -> Result<PathBuf, TableIoError> {
    let path = dated_snapshot_path(dir, cohort, modality, date);
    write_table_atomic(&path, table, TAB)?;
    tracing::info!(
        path = %path.display(),
        rows = table.len(),
        columns = table.columns().len(),
        "snapshot written"
    );
    Ok(path)
}

/// Local calendar date of this run.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
}
