//! Scanledger storage layer
//!
//! ```text
//! ┌──────────────┐   batch    ┌────────────────────┐
//! │ IQM batch    │──────────► │ dated snapshot     │  <cohort>_<modality>_<date>.tsv
//! │ (+ outliers) │            └────────────────────┘
//! │              │   upsert   ┌────────────────────┐
//! │              │──────────► │ canonical ledger   │  <cohort>_<modality>.tsv
//! └──────────────┘            └────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Atomic**: table files are replaced by rename, never rewritten in place
//! - **Keyed**: at most one ledger row per (`participant_id`, `file_name`)
//! - **Serialized**: upserts of the same ledger never interleave
//! - **Lossless**: re-writing a ledger that was read back yields identical bytes

pub mod ledger;
pub mod snapshot;
pub mod table_io;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use scanledger_model::delimited::TAB;
use scanledger_model::{Cohort, Modality, PipelineConfig, Table};
use serde::{Deserialize, Serialize};

pub use ledger::{merge, LedgerError, LedgerStore, UpsertOutcome};
pub use snapshot::{
    canonical_ledger_path, dated_snapshot_path, parse_date, today, write_dated_snapshot,
    DATE_FORMAT,
};
pub use table_io::{read_table, read_table_if_exists, write_table_atomic, TableIoError};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding dated snapshots and canonical ledgers
    pub reports_dir: PathBuf,
    /// How long an upsert waits for another writer of the same ledger
    pub lock_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("./weekly_group_reports"),
            lock_timeout: Duration::from_secs(scanledger_model::config::DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }
}

impl From<&PipelineConfig> for StorageConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            reports_dir: config.group_reports_dir(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

// ============================================================================
// Group reports
// ============================================================================

/// Snapshots and ledgers of one reports directory.
pub struct GroupReports {
    config: StorageConfig,
    ledgers: LedgerStore,
}

impl GroupReports {
    pub fn new(config: StorageConfig) -> Self {
        let ledgers = LedgerStore::new(config.lock_timeout);
        Self { config, ledgers }
    }

    pub fn dir(&self) -> &Path {
        &self.config.reports_dir
    }

    pub fn ledger_path(&self, cohort: Cohort, modality: Modality) -> PathBuf {
        canonical_ledger_path(self.dir(), cohort, modality)
    }

    pub fn snapshot_path(&self, cohort: Cohort, modality: Modality, date: NaiveDate) -> PathBuf {
        dated_snapshot_path(self.dir(), cohort, modality, date)
    }

    pub fn write_snapshot(
        &self,
        cohort: Cohort,
        modality: Modality,
        date: NaiveDate,
        batch: &Table,
    ) -> Result<PathBuf, TableIoError> {
        write_dated_snapshot(self.dir(), cohort, modality, date, batch)
    }

    pub fn upsert_ledger(
        &self,
        cohort: Cohort,
        modality: Modality,
        batch: &Table,
    ) -> Result<UpsertOutcome, LedgerError> {
        self.ledgers.upsert(batch, &self.ledger_path(cohort, modality))
    }

    pub fn load_snapshot(
        &self,
        cohort: Cohort,
        modality: Modality,
        date: NaiveDate,
    ) -> Result<Option<Table>, TableIoError> {
        read_table_if_exists(&self.snapshot_path(cohort, modality, date), TAB)
    }

    pub fn load_ledger(
        &self,
        cohort: Cohort,
        modality: Modality,
    ) -> Result<Option<Table>, TableIoError> {
        read_table_if_exists(&self.ledger_path(cohort, modality), TAB)
    }
}
