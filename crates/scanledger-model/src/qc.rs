//! QC modalities and resolved QC status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Modality of a QC computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Structural (anatomical) T1-weighted.
    T1w,
    /// Functional BOLD.
    Bold,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::T1w, Modality::Bold];

    /// Token used in file names: `baseline_T1w.tsv`, `sub-1001_task-rest_bold.json`.
    pub fn file_token(self) -> &'static str {
        match self {
            Modality::T1w => "T1w",
            Modality::Bold => "bold",
        }
    }

    /// Derivatives subdirectory holding this modality's result documents.
    pub fn derivatives_subdir(self) -> &'static str {
        match self {
            Modality::T1w => "anat",
            Modality::Bold => "func",
        }
    }

    /// Suffix of a per-subject result document (`_T1w.json`).
    pub fn document_suffix(self) -> String {
        format!("_{}.json", self.file_token())
    }

    /// Substring identifying this modality's per-subject report artifact.
    pub fn artifact_marker(self) -> String {
        format!("{}.html", self.file_token())
    }

    /// Tabular evidence file name (`group_T1w.tsv`).
    pub fn evidence_file_name(self) -> String {
        format!("group_{}.tsv", self.file_token())
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_token())
    }
}

/// QC status of one subject, resolved from T1 and BOLD evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QcStatus {
    BothPresent,
    T1Only,
    BoldOnly,
    Neither,
}

impl QcStatus {
    pub fn from_evidence(has_t1: bool, has_bold: bool) -> Self {
        match (has_t1, has_bold) {
            (true, true) => QcStatus::BothPresent,
            (true, false) => QcStatus::T1Only,
            (false, true) => QcStatus::BoldOnly,
            (false, false) => QcStatus::Neither,
        }
    }

    /// Code written to the `MRIQC` column of the presence table.
    pub fn code(self) -> &'static str {
        match self {
            QcStatus::BothPresent => "1",
            QcStatus::T1Only => "no_bold",
            QcStatus::BoldOnly => "no_t1",
            QcStatus::Neither => "0",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(QcStatus::BothPresent),
            "no_bold" => Some(QcStatus::T1Only),
            "no_t1" => Some(QcStatus::BoldOnly),
            "0" => Some(QcStatus::Neither),
            _ => None,
        }
    }

    /// Human-readable form used in the missing-scan report.
    pub fn describe(self) -> String {
        match self {
            QcStatus::BothPresent => "MRIQC OK".to_string(),
            QcStatus::Neither => "MRIQC missing BOTH".to_string(),
            other => format!("MRIQC {}", other.code()),
        }
    }

    /// Subjects with no QC output at all are queued for computation.
    pub fn needs_qc(self) -> bool {
        self == QcStatus::Neither
    }
}
