//! Canonical ledger upsert.
//!
//! One ledger per (cohort, modality). A batch is merged in by key
//! (`participant_id`, `file_name`): rows of the batch replace ledger rows with
//! the same key, every other ledger row is kept, and the result is sorted by
//! key. The engine does no cohort inference; callers hand it a batch that was
//! already restricted to the ledger's cohort.
//!
//! Concurrent upserts of the same ledger are serialized twice over: an
//! in-process mutex per ledger path, and an advisory lock on `<ledger>.lock`
//! held for the whole read-merge-write cycle so separate processes cannot
//! interleave either. Different ledgers never contend.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scanledger_model::delimited::TAB;
use scanledger_model::{Table, KEY_COLUMNS};
use thiserror::Error;

use crate::table_io::{read_table_if_exists, write_table_atomic, TableIoError};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "timed out after {}s waiting for `{}` (ledger `{}`)",
        .waited.as_secs(),
        .lock.display(),
        .path.display()
    )]
    LockTimeout {
        path: PathBuf,
        lock: PathBuf,
        waited: Duration,
    },
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Table(#[from] TableIoError),
    #[error("{what} has no `{column}` column; cannot key rows")]
    MissingKey { what: String, column: String },
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The ledger did not exist before this upsert.
    pub created: bool,
    pub previous_rows: usize,
    pub batch_rows: usize,
    /// Ledger keys replaced by a batch row.
    pub superseded: usize,
    pub rows: usize,
}

fn require_keys(table: &Table, what: &str) -> Result<(), LedgerError> {
    for column in KEY_COLUMNS {
        if !table.has_column(column) {
            return Err(LedgerError::MissingKey {
                what: what.to_string(),
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

fn key_of(table: &Table, row: usize) -> Vec<String> {
    KEY_COLUMNS
        .iter()
        .map(|c| table.cell(row, c).map(|v| v.render()).unwrap_or_default())
        .collect()
}

/// Pure merge: `prior` rows, then `batch` rows, last occurrence of each key
/// wins, sorted by key with missing keys last.
pub fn merge(prior: Option<&Table>, batch: &Table) -> Table {
    let mut merged = match prior {
        Some(prior) => {
            let mut merged = prior.clone();
            merged.append(batch);
            merged
        }
        None => batch.clone(),
    };
    merged.dedup_keep_last(&KEY_COLUMNS);
    merged.sort_by_columns(&KEY_COLUMNS);
    merged
}

/// Advisory lock on `<ledger>.lock`, held for as long as the guard lives.
///
/// The lock file itself is never removed. The kernel drops the lock when the
/// handle closes, including when the holder is killed, so a leftover file
/// never blocks a later run.
struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    fn path_for(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire(ledger_path: &Path, timeout: Duration) -> Result<Self, LedgerError> {
        let path = Self::path_for(ledger_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;

        let start = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    if start.elapsed() >= timeout {
                        return Err(LedgerError::LockTimeout {
                            path: ledger_path.to_path_buf(),
                            lock: path,
                            waited: start.elapsed(),
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(TryLockError::Error(source)) => return Err(LedgerError::Io { path, source }),
            }
        }

        // Holder pid, for whoever inspects a blocked run.
        let _ = file
            .set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()));
        Ok(Self { path, file })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release ledger lock");
        }
    }
}

/// Serializes upserts per ledger path.
pub struct LedgerStore {
    lock_timeout: Duration,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            lock_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Stable identity for a ledger path, so `a/../a/x.tsv` and `a/x.tsv`
    /// share one lock.
    fn normalize(path: &Path) -> Result<PathBuf, LedgerError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| LedgerError::Io {
            path: parent.clone(),
            source,
        })?;
        let parent = fs::canonicalize(&parent).map_err(|source| LedgerError::Io {
            path: parent.clone(),
            source,
        })?;
        Ok(match path.file_name() {
            Some(name) => parent.join(name),
            None => parent,
        })
    }

    /// Merge `batch` into the ledger at `ledger_path`, creating it if absent.
    ///
    /// The ledger file is replaced atomically. On any error the previous
    /// ledger is left as it was.
    pub fn upsert(&self, batch: &Table, ledger_path: &Path) -> Result<UpsertOutcome, LedgerError> {
        require_keys(batch, "batch")?;
        let path = Self::normalize(ledger_path)?;

        let in_process = self.path_lock(&path);
        let _guard = in_process
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LedgerError::LockTimeout {
                path: path.clone(),
                lock: LockFile::path_for(&path),
                waited: self.lock_timeout,
            })?;
        let _file_lock = LockFile::acquire(&path, self.lock_timeout)?;

        let prior = read_table_if_exists(&path, TAB)?;
        if let Some(prior) = &prior {
            require_keys(prior, &format!("ledger `{}`", path.display()))?;
        }

        let superseded = match &prior {
            Some(prior) => {
                let batch_keys: HashSet<Vec<String>> =
                    (0..batch.len()).map(|r| key_of(batch, r)).collect();
                let prior_keys: HashSet<Vec<String>> =
                    (0..prior.len()).map(|r| key_of(prior, r)).collect();
                prior_keys.intersection(&batch_keys).count()
            }
            None => 0,
        };

        let merged = merge(prior.as_ref(), batch);
        write_table_atomic(&path, &merged, TAB)?;

        let outcome = UpsertOutcome {
            created: prior.is_none(),
            previous_rows: prior.as_ref().map(Table::len).unwrap_or(0),
            batch_rows: batch.len(),
            superseded,
            rows: merged.len(),
        };
        tracing::info!(
            ledger = %path.display(),
            created = outcome.created,
            previous_rows = outcome.previous_rows,
            batch_rows = outcome.batch_rows,
            superseded = outcome.superseded,
            rows = outcome.rows,
            "ledger updated"
        );
        Ok(outcome)
    }
}
