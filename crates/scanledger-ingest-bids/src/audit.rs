//! Per-cohort audit: which subjects have which scans, and their QC status.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use scanledger_model::{
    Cohort, MetricValue, PresenceVector, QcStatus, ScanCategory, SubjectId, Table,
};

use crate::scanner::{scan_subject, ScanError, ScanPatterns};

/// Subject column of the presence table (`sub-1001`).
pub const SUBJECT_COLUMN: &str = "ID";
/// QC status column of the presence table.
pub const MRIQC_COLUMN: &str = "MRIQC";

const REPORT_RULE: &str = "=================================";

/// Subject directories found on the acquisition tree, split by cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredSubjects {
    pub baseline: Vec<SubjectId>,
    pub scan2: Vec<SubjectId>,
}

impl DiscoveredSubjects {
    pub fn cohort(&self, cohort: Cohort) -> &[SubjectId] {
        match cohort {
            Cohort::Baseline => &self.baseline,
            Cohort::Scan2 => &self.scan2,
        }
    }

    pub fn total(&self) -> usize {
        self.baseline.len() + self.scan2.len()
    }
}

/// List `sub-*` directories under the acquisition root and classify them.
/// Names of any other shape are skipped.
pub fn discover_subjects(bids_root: &Path) -> Result<DiscoveredSubjects, ScanError> {
    if !bids_root.is_dir() {
        return Err(ScanError::MissingRoot(bids_root.to_path_buf()));
    }
    let entries = fs::read_dir(bids_root).map_err(|source| ScanError::ListDir {
        path: bids_root.to_path_buf(),
        source,
    })?;

    let mut found = DiscoveredSubjects::default();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("sub-") || !entry.path().is_dir() {
            continue;
        }
        match SubjectId::parse(&name) {
            Some(id) => match id.cohort() {
                Cohort::Baseline => found.baseline.push(id),
                Cohort::Scan2 => found.scan2.push(id),
            },
            None => tracing::debug!(name = %name, "skipping subject directory of unknown shape"),
        }
    }
    found.baseline.sort();
    found.scan2.sort();
    Ok(found)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectAudit {
    pub subject: SubjectId,
    pub presence: PresenceVector,
    pub status: QcStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditFailure {
    pub subject: SubjectId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CohortAudit {
    pub cohort: Cohort,
    /// Sorted by subject.
    pub rows: Vec<SubjectAudit>,
    /// Subjects whose tree could not be scanned; the rest of the cohort is unaffected.
    pub failures: Vec<AuditFailure>,
}

/// Scan every subject of one cohort in parallel and attach its QC status.
pub fn audit_cohort<F>(
    bids_root: &Path,
    cohort: Cohort,
    subjects: &[SubjectId],
    patterns: &ScanPatterns,
    status_of: F,
) -> CohortAudit
where
    F: Fn(&SubjectId) -> QcStatus + Sync,
{
    tracing::info!(cohort = %cohort, subjects = subjects.len(), "scanning cohort");

    let results: Vec<Result<SubjectAudit, AuditFailure>> = subjects
        .par_iter()
        .map(|subject| {
            let root = bids_root.join(subject.dir_name());
            match scan_subject(&root, patterns) {
                Ok(presence) => Ok(SubjectAudit {
                    subject: subject.clone(),
                    presence,
                    status: status_of(subject),
                }),
                Err(err) => {
                    tracing::warn!(subject = %subject, error = %err, "subject scan failed");
                    Err(AuditFailure {
                        subject: subject.clone(),
                        reason: err.to_string(),
                    })
                }
            }
        })
        .collect();

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(row) => rows.push(row),
            Err(failure) => failures.push(failure),
        }
    }
    rows.sort_by(|a, b| a.subject.cmp(&b.subject));
    failures.sort_by(|a, b| a.subject.cmp(&b.subject));

    CohortAudit {
        cohort,
        rows,
        failures,
    }
}

impl CohortAudit {
    /// Presence table: `ID`, one `1`/`0` column per category, then `MRIQC`.
    pub fn to_table(&self) -> Table {
        let mut columns = vec![SUBJECT_COLUMN];
        columns.extend(ScanCategory::ALL.iter().map(|c| c.column()));
        columns.push(MRIQC_COLUMN);

        let mut table = Table::new(columns);
        for row in &self.rows {
            let mut cells = vec![MetricValue::text(row.subject.to_string())];
            cells.extend(
                row.presence
                    .iter()
                    .map(|(_, present)| MetricValue::Number(if present { 1.0 } else { 0.0 })),
            );
            cells.push(MetricValue::text(row.status.code()));
            table.push_row(cells);
        }
        table
    }

    pub fn subjects_needing_qc(&self) -> Vec<SubjectId> {
        self.rows
            .iter()
            .filter(|r| r.status.needs_qc())
            .map(|r| r.subject.clone())
            .collect()
    }

    /// Human-readable missing-scan report.
    pub fn render_missing_report(&self) -> String {
        let mut lines = vec![format!(
            "====== Missing Scans Report ({}) ======\n",
            self.cohort
        )];
        for row in &self.rows {
            let missing = row.presence.missing();
            let status = row.status.describe();
            if missing.is_empty() {
                lines.push(format!("{} has ALL scans ✓ | {status}", row.subject));
            } else {
                let names: Vec<&str> = missing.iter().map(|c| c.column()).collect();
                lines.push(format!(
                    "{} missing: {} | {status}",
                    row.subject,
                    names.join(", ")
                ));
            }
        }
        for failure in &self.failures {
            lines.push(format!("{} scan FAILED: {}", failure.subject, failure.reason));
        }
        lines.push(format!("\n{REPORT_RULE}\n"));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanledger_model::delimited;

    fn id(label: &str) -> SubjectId {
        SubjectId::parse(label).unwrap()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn discovery_splits_cohorts_and_ignores_other_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["sub-1002", "sub-1001", "sub-10011", "sub-10012", "sub-100", "derivatives"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("sub-1003"), b"not a dir").unwrap();

        let found = discover_subjects(dir.path()).unwrap();
        assert_eq!(found.baseline, vec![id("1001"), id("1002")]);
        assert_eq!(found.scan2, vec![id("10011")]);
        assert_eq!(found.total(), 3);
    }

    #[test]
    fn discovery_requires_the_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_subjects(&dir.path().join("missing")),
            Err(ScanError::MissingRoot(_))
        ));
    }

    #[test]
    fn audit_records_failures_without_dropping_other_subjects() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub-1001/dwi/sub-1001_dwi.nii.gz"));

        let audit = audit_cohort(
            dir.path(),
            Cohort::Baseline,
            &[id("1002"), id("1001")],
            ScanPatterns::standard(),
            |_| QcStatus::Neither,
        );
        assert_eq!(audit.rows.len(), 1);
        assert_eq!(audit.rows[0].subject, id("1001"));
        assert_eq!(audit.failures.len(), 1);
        assert_eq!(audit.failures[0].subject, id("1002"));
        assert_eq!(audit.subjects_needing_qc(), vec![id("1001")]);
    }

    #[test]
    fn presence_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub-1001/dwi/sub-1001_dwi.nii.gz"));
        touch(&dir.path().join("sub-1001/func/sub-1001_task-rest_bold.nii.gz"));

        let audit = audit_cohort(
            dir.path(),
            Cohort::Baseline,
            &[id("1001")],
            ScanPatterns::standard(),
            |_| QcStatus::T1Only,
        );
        let csv = delimited::render(&audit.to_table(), delimited::COMMA);
        assert_eq!(
            csv,
            "ID,hippocampus,dwi,resting_state,think_aloud,minds_eye,MRIQC\n\
             sub-1001,0,1,1,0,0,no_bold\n"
        );
    }

    #[test]
    fn missing_report_format() {
        let mut complete = PresenceVector::default();
        for c in ScanCategory::ALL {
            complete.mark(c);
        }
        let mut partial = PresenceVector::default();
        partial.mark(ScanCategory::Dwi);
        partial.mark(ScanCategory::RestingState);

        let audit = CohortAudit {
            cohort: Cohort::Scan2,
            rows: vec![
                SubjectAudit {
                    subject: id("10011"),
                    presence: complete,
                    status: QcStatus::BothPresent,
                },
                SubjectAudit {
                    subject: id("10021"),
                    presence: partial,
                    status: QcStatus::Neither,
                },
            ],
            failures: vec![AuditFailure {
                subject: id("10031"),
                reason: "permission denied".to_string(),
            }],
        };
        let expected = "====== Missing Scans Report (scan2) ======\n\n\
                        sub-10011 has ALL scans ✓ | MRIQC OK\n\
                        sub-10021 missing: hippocampus, think_aloud, minds_eye | MRIQC missing BOTH\n\
                        sub-10031 scan FAILED: permission denied\n\
                        \n=================================\n";
        assert_eq!(audit.render_missing_report(), expected);
    }
}
