//! Acquisition presence scanner.
//!
//! Every file anywhere under a subject's root is tested against the category
//! rules below. A category is marked the first time any file matches it;
//! later files are only tested against categories still unmarked.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use scanledger_model::{PresenceVector, ScanCategory};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("subject root `{0}` does not exist")]
    MissingRoot(PathBuf),
    #[error("`{path}` is not a directory")]
    NotADirectory { path: PathBuf },
    #[error("failed to list `{path}`: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable path under `{root}`: {source}")]
    Unreadable {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// File-name rules, one per scan category.
#[derive(Debug, Clone)]
pub struct ScanPatterns {
    rules: Vec<(ScanCategory, Regex)>,
}

const STANDARD_RULES: [(ScanCategory, &str); ScanCategory::COUNT] = [
    (ScanCategory::Hippocampus, r"acq-hippo.*_T2w\.nii\.gz$"),
    (ScanCategory::Dwi, r"_dwi\.nii\.gz$"),
    (ScanCategory::RestingState, r"task-rest.*_bold\.nii\.gz$"),
    (ScanCategory::ThinkAloud, r"task-ta.*_bold\.nii\.gz$"),
    (ScanCategory::MindsEye, r"task-me.*_bold\.nii\.gz$"),
];

impl ScanPatterns {
    pub fn new(rules: &[(ScanCategory, &str)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(category, pattern)| Ok((*category, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// The study's acquisition naming rules.
    pub fn standard() -> &'static ScanPatterns {
        static PATTERNS: OnceLock<ScanPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            ScanPatterns::new(&STANDARD_RULES).expect("standard scan patterns are valid")
        })
    }

    /// Mark every still-absent category that `file_name` matches.
    pub fn classify_into(&self, file_name: &str, presence: &mut PresenceVector) {
        for (category, re) in &self.rules {
            if !presence.is_present(*category) && re.is_match(file_name) {
                presence.mark(*category);
            }
        }
    }
}

/// Scan one subject's tree.
///
/// A missing root is an error, never "zero scans". The whole tree is walked
/// even once every category is present, and any unreadable entry fails the
/// subject so a half-read tree is never reported as complete or missing data.
pub fn scan_subject(root: &Path, patterns: &ScanPatterns) -> Result<PresenceVector, ScanError> {
    if !root.exists() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut presence = PresenceVector::default();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|source| ScanError::Unreadable {
            root: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        patterns.classify_into(&name, &mut presence);
    }
    Ok(presence)
}
