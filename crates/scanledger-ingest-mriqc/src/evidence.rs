//! The two independent sources of QC evidence.
//!
//! - `TabularEvidence`: subjects named in the group tables' `bids_name` column.
//! - `ArtifactIndex`: subjects with an HTML report in the derivatives
//!   directory, built from one directory listing per run.
//!
//! Both extract the subject with `extract_subject_id`, so `sub-10011_...`
//! stays a scan2 subject and never collapses into `sub-1001`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use scanledger_model::delimited::{self, TAB};
use scanledger_model::{extract_subject_id, Modality, SubjectId, Table, TableError};
use thiserror::Error;

/// Result-identifier column of the group tables.
pub const BIDS_NAME_COLUMN: &str = "bids_name";

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("failed to read evidence table `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed evidence table `{path}`: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

// ============================================================================
// Tabular evidence
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularEvidence {
    t1: HashSet<SubjectId>,
    bold: HashSet<SubjectId>,
}

impl TabularEvidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read both group tables.
    ///
    /// An absent table means that source has no evidence yet (the group
    /// summary may simply not have been generated); it is logged, not fatal.
    pub fn load(t1_table: &Path, bold_table: &Path) -> Result<Self, EvidenceError> {
        let mut evidence = Self::new();
        for (modality, path) in [(Modality::T1w, t1_table), (Modality::Bold, bold_table)] {
            if !path.exists() {
                tracing::warn!(
                    path = %path.display(),
                    modality = %modality,
                    "evidence table missing; treating as no tabular evidence"
                );
                continue;
            }
            let text = fs::read_to_string(path).map_err(|source| EvidenceError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let table = delimited::parse(&text, TAB)
                .and_then(|table| evidence.add_table(modality, &table).map(|_| table))
                .map_err(|source| EvidenceError::Malformed {
                    path: path.to_path_buf(),
                    source,
                })?;
            tracing::debug!(
                path = %path.display(),
                rows = table.len(),
                subjects = evidence.subjects(modality).len(),
                "loaded evidence table"
            );
        }
        Ok(evidence)
    }

    /// Record every subject named in `table`'s `bids_name` column.
    /// Names that do not carry a cohort-shaped subject are ignored.
    pub fn add_table(&mut self, modality: Modality, table: &Table) -> Result<(), TableError> {
        let names = table
            .column_values(BIDS_NAME_COLUMN)
            .ok_or_else(|| TableError::MissingColumn(BIDS_NAME_COLUMN.to_string()))?;
        for name in names {
            if let Some(subject) = extract_subject_id(&name.render()) {
                self.insert(modality, subject);
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, modality: Modality, subject: SubjectId) {
        match modality {
            Modality::T1w => self.t1.insert(subject),
            Modality::Bold => self.bold.insert(subject),
        };
    }

    pub fn has(&self, subject: &SubjectId, modality: Modality) -> bool {
        self.subjects(modality).contains(subject)
    }

    pub fn subjects(&self, modality: Modality) -> &HashSet<SubjectId> {
        match modality {
            Modality::T1w => &self.t1,
            Modality::Bold => &self.bold,
        }
    }
}

// ============================================================================
// Artifact index
// ============================================================================

/// Per-subject (has T1 report, has BOLD report) from one directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactIndex {
    entries: HashMap<SubjectId, (bool, bool)>,
    degraded: bool,
}

impl ArtifactIndex {
    /// List `dir` once, giving up after `timeout`.
    ///
    /// The directory is often a network mount that can stall indefinitely.
    /// The listing runs on a worker thread; if it errors or does not answer
    /// in time the index comes back empty and marked degraded, and status
    /// resolution falls back to tabular evidence alone. A stalled worker is
    /// left behind rather than joined.
    pub fn build(dir: &Path, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let target = dir.to_path_buf();
        let spawned = thread::Builder::new()
            .name("artifact-listing".to_string())
            .spawn(move || {
                let _ = tx.send(list_file_names(&target));
            });
        if let Err(err) = spawned {
            tracing::warn!(dir = %dir.display(), error = %err, "could not start artifact listing");
            return Self::degraded();
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(names)) => {
                let index = Self::from_names(names.iter().map(String::as_str));
                tracing::debug!(
                    dir = %dir.display(),
                    files = names.len(),
                    subjects = index.len(),
                    "artifact index built"
                );
                index
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %err,
                    "artifact directory unreadable; using tabular evidence only"
                );
                Self::degraded()
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    dir = %dir.display(),
                    timeout_secs = timeout.as_secs(),
                    "artifact directory listing timed out; using tabular evidence only"
                );
                Self::degraded()
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::warn!(dir = %dir.display(), "artifact listing worker exited early");
                Self::degraded()
            }
        }
    }

    /// Classify report file names (`sub-1001_T1w.html`, `sub-10011_task-rest_bold.html`).
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut entries: HashMap<SubjectId, (bool, bool)> = HashMap::new();
        let t1_marker = Modality::T1w.artifact_marker();
        let bold_marker = Modality::Bold.artifact_marker();
        for name in names {
            let Some(subject) = extract_subject_id(name) else {
                continue;
            };
            let entry = entries.entry(subject).or_default();
            if name.contains(&t1_marker) {
                entry.0 = true;
            }
            if name.contains(&bold_marker) {
                entry.1 = true;
            }
        }
        Self {
            entries,
            degraded: false,
        }
    }

    fn degraded() -> Self {
        Self {
            entries: HashMap::new(),
            degraded: true,
        }
    }

    pub fn has(&self, subject: &SubjectId, modality: Modality) -> bool {
        let (t1, bold) = self.entries.get(subject).copied().unwrap_or_default();
        match modality {
            Modality::T1w => t1,
            Modality::Bold => bold,
        }
    }

    /// True when the listing failed or timed out and the index is empty for
    /// that reason.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn list_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanledger_model::MetricValue;

    fn id(label: &str) -> SubjectId {
        SubjectId::parse(label).unwrap()
    }

    #[test]
    fn tabular_evidence_keeps_followup_subjects_apart() {
        let mut table = Table::new([BIDS_NAME_COLUMN, "snr"]);
        table.push_named([(BIDS_NAME_COLUMN, MetricValue::text("sub-10011_task-rest_bold"))]);
        table.push_named([(BIDS_NAME_COLUMN, MetricValue::text("sub-1002_task-ta_bold"))]);
        table.push_named([(BIDS_NAME_COLUMN, MetricValue::text("group_summary"))]);

        let mut evidence = TabularEvidence::new();
        evidence.add_table(Modality::Bold, &table).unwrap();
        assert!(evidence.has(&id("10011"), Modality::Bold));
        assert!(!evidence.has(&id("1001"), Modality::Bold));
        assert!(evidence.has(&id("1002"), Modality::Bold));
        assert!(!evidence.has(&id("1002"), Modality::T1w));
    }

    #[test]
    fn table_without_bids_name_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = dir.path().join("group_T1w.tsv");
        fs::write(&t1, "name\tcjv\nsub-1001_T1w\t0.4\n").unwrap();
        let err = TabularEvidence::load(&t1, &dir.path().join("group_bold.tsv")).unwrap_err();
        assert!(matches!(
            err,
            EvidenceError::Malformed {
                source: TableError::MissingColumn(_),
                ..
            }
        ));
    }

    #[test]
    fn absent_tables_mean_no_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = TabularEvidence::load(
            &dir.path().join("group_T1w.tsv"),
            &dir.path().join("group_bold.tsv"),
        )
        .unwrap();
        assert_eq!(evidence, TabularEvidence::default());
    }

    #[test]
    fn artifact_names_are_classified_by_marker() {
        let index = ArtifactIndex::from_names([
            "sub-1001_T1w.html",
            "sub-10011_task-rest_bold.html",
            "sub-1002_T1w.json",
            "dataset_description.json",
        ]);
        assert!(index.has(&id("1001"), Modality::T1w));
        assert!(!index.has(&id("1001"), Modality::Bold));
        assert!(index.has(&id("10011"), Modality::Bold));
        assert!(!index.has(&id("1002"), Modality::T1w));
        assert!(!index.is_degraded());
    }

    #[test]
    fn listing_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sub-1001_T1w.html"), b"<html/>").unwrap();
        fs::create_dir(dir.path().join("sub-1002_bold.html")).unwrap();
        let index = ArtifactIndex::build(dir.path(), Duration::from_secs(5));
        assert!(index.has(&id("1001"), Modality::T1w));
        assert!(!index.has(&id("1002"), Modality::Bold));
    }

    #[test]
    fn unreachable_directory_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = ArtifactIndex::build(&dir.path().join("not-mounted"), Duration::from_secs(5));
        assert!(index.is_degraded());
        assert!(index.is_empty());
    }
}
