//! Presence tables read back from disk.
//!
//! The audit writes one presence CSV per cohort; later stages (QC runs,
//! aggregation) read it back to decide which subjects still need work.

use std::fs;
use std::path::{Path, PathBuf};

use scanledger_model::delimited::{self, COMMA};
use scanledger_model::{QcStatus, SubjectId, Table, TableError};
use thiserror::Error;

use crate::audit::{MRIQC_COLUMN, SUBJECT_COLUMN};

#[derive(Debug, Error)]
pub enum PresenceError {
    /// Presence tables are required inputs: a run cannot select subjects
    /// without them.
    #[error("required presence table `{0}` does not exist (run the audit first)")]
    MissingInput(PathBuf),
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed presence table `{path}`: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

/// Load every presence table; the first absent or malformed one aborts.
pub fn load_presence_tables(paths: &[PathBuf]) -> Result<Vec<Table>, PresenceError> {
    paths.iter().map(|p| load_presence_table(p)).collect()
}

pub fn load_presence_table(path: &Path) -> Result<Table, PresenceError> {
    if !path.exists() {
        return Err(PresenceError::MissingInput(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|source| PresenceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let table = delimited::parse(&text, COMMA).map_err(|source| PresenceError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    for column in [SUBJECT_COLUMN, MRIQC_COLUMN] {
        if !table.has_column(column) {
            return Err(PresenceError::Malformed {
                path: path.to_path_buf(),
                source: TableError::MissingColumn(column.to_string()),
            });
        }
    }
    Ok(table)
}

/// QC status of one presence row, if the row carries a recognizable code.
pub fn presence_row_status(table: &Table, row: usize) -> Option<QcStatus> {
    let cell = table.cell(row, MRIQC_COLUMN)?;
    QcStatus::from_code(&cell.render())
}

/// Subjects whose `MRIQC` cell says no QC output exists at all.
///
/// Rows with an unrecognizable subject or status are skipped.
pub fn subjects_needing_qc(table: &Table) -> Vec<SubjectId> {
    (0..table.len())
        .filter(|&row| presence_row_status(table, row).is_some_and(QcStatus::needs_qc))
        .filter_map(|row| {
            let cell = table.cell(row, SUBJECT_COLUMN)?;
            SubjectId::parse(&cell.render())
        })
        .collect()
}
