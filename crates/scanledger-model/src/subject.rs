//! Subject identity and cohort classification.
//!
//! The study encodes its two timepoints in the subject id itself:
//!
//! ```text
//! sub-1001    baseline  (4 digits)
//! sub-10011   scan2     (the baseline id with a trailing `1`)
//! ```
//!
//! Classification is always a full structural match, never a substring or
//! prefix search: `sub-10011` must not leak into the baseline cohort because
//! it happens to start with `sub-1001`.
//!
//! Known collision: a 5-digit baseline id ending in `1` would be read as a
//! scan2 id. The rule is kept exactly as the acquisition site uses it; ids
//! past 9999 are not supported.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SUBJECT_PREFIX: &str = "sub-";

fn baseline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}$").expect("valid baseline regex"))
}

fn scan2_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}1$").expect("valid scan2 regex"))
}

fn leading_subject_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sub-(\d+)").expect("valid subject prefix regex"))
}

/// Study timepoint of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Baseline,
    Scan2,
}

impl Cohort {
    pub const ALL: [Cohort; 2] = [Cohort::Baseline, Cohort::Scan2];

    /// Name used in output file names (`baseline_T1w.tsv`, `scan2_bold.tsv`).
    pub fn as_str(self) -> &'static str {
        match self {
            Cohort::Baseline => "baseline",
            Cohort::Scan2 => "scan2",
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a candidate directory or record name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectClass {
    Baseline,
    Scan2,
    Rejected,
}

impl SubjectClass {
    pub fn cohort(self) -> Option<Cohort> {
        match self {
            SubjectClass::Baseline => Some(Cohort::Baseline),
            SubjectClass::Scan2 => Some(Cohort::Scan2),
            SubjectClass::Rejected => None,
        }
    }
}

/// Classify a subject name (`sub-1001`, `1001`, `sub-10011`, ...).
///
/// Total: anything that is not exactly a cohort-shaped id is `Rejected`.
pub fn classify_subject(name: &str) -> SubjectClass {
    let label = name.strip_prefix(SUBJECT_PREFIX).unwrap_or(name);
    if baseline_re().is_match(label) {
        SubjectClass::Baseline
    } else if scan2_re().is_match(label) {
        SubjectClass::Scan2
    } else {
        SubjectClass::Rejected
    }
}

/// A validated subject label (digits only, e.g. `1001` or `10011`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Parse a name with or without the `sub-` prefix.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        classify_subject(name).cohort()?;
        let label = name.strip_prefix(SUBJECT_PREFIX).unwrap_or(name);
        Some(SubjectId(label.to_string()))
    }

    /// Digits only: `1001`.
    pub fn label(&self) -> &str {
        &self.0
    }

    /// Directory name on the acquisition tree: `sub-1001`.
    pub fn dir_name(&self) -> String {
        format!("{SUBJECT_PREFIX}{}", self.0)
    }

    pub fn cohort(&self) -> Cohort {
        // Construction guarantees a cohort-shaped label.
        if scan2_re().is_match(&self.0) {
            Cohort::Scan2
        } else {
            Cohort::Baseline
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SUBJECT_PREFIX}{}", self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = SubjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SubjectId::parse(&value).ok_or(SubjectError::UnrecognizedLabel(value))
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error(
        "subject label `{0}` does not match baseline (####) or scan2 (####1); \
         pass labels like 1001 or 10011 (or sub-1001/sub-10011)"
    )]
    UnrecognizedLabel(String),
}

/// Extract the subject from a result, report or file name such as
/// `sub-10011_task-rest_bold.json`.
///
/// The whole leading digit run is taken and then classified, so the scan2
/// trailing digit is never stripped and a digit run of any other shape is
/// rejected rather than truncated into a baseline-looking id.
pub fn extract_subject_id(name: &str) -> Option<SubjectId> {
    let caps = leading_subject_re().captures(name)?;
    SubjectId::parse(caps.get(1)?.as_str())
}

/// Normalize user-supplied subject labels.
///
/// Accepts `1001`/`sub-1001` and `10011`/`sub-10011`; blanks are dropped.
/// Returns `None` when no labels were given at all.
pub fn parse_subject_labels<I, S>(raw: Option<I>) -> Option<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let out: Vec<String> = raw?
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| s.strip_prefix(SUBJECT_PREFIX).map(str::to_string).unwrap_or(s))
        .collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Split labels into (baseline, scan2). Any other shape is an error.
pub fn split_by_cohort<S: AsRef<str>>(
    labels: &[S],
) -> Result<(Vec<SubjectId>, Vec<SubjectId>), SubjectError> {
    let mut baseline = Vec::new();
    let mut scan2 = Vec::new();
    for label in labels {
        let label = label.as_ref();
        let id = SubjectId::parse(label)
            .ok_or_else(|| SubjectError::UnrecognizedLabel(label.to_string()))?;
        match id.cohort() {
            Cohort::Baseline => baseline.push(id),
            Cohort::Scan2 => scan2.push(id),
        }
    }
    Ok((baseline, scan2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_both_cohorts_with_and_without_prefix() {
        assert_eq!(classify_subject("sub-1001"), SubjectClass::Baseline);
        assert_eq!(classify_subject("1001"), SubjectClass::Baseline);
        assert_eq!(classify_subject("sub-10011"), SubjectClass::Scan2);
        assert_eq!(classify_subject("10011"), SubjectClass::Scan2);
    }

    #[test]
    fn rejects_near_misses() {
        for name in [
            "sub-100", "sub-10012", "sub-100111", "sub-1001a", "xsub-1001", "sub-", "",
            "ses-1001", "sub-1001/anat",
        ] {
            assert_eq!(classify_subject(name), SubjectClass::Rejected, "{name}");
        }
    }

    #[test]
    fn extraction_keeps_the_followup_digit() {
        let id = extract_subject_id("sub-10011_task-rest_bold.json").unwrap();
        assert_eq!(id.label(), "10011");
        assert_eq!(id.cohort(), Cohort::Scan2);

        let id = extract_subject_id("sub-1001_T1w.html").unwrap();
        assert_eq!(id.label(), "1001");
        assert_eq!(id.cohort(), Cohort::Baseline);
    }

    #[test]
    fn extraction_does_not_truncate_foreign_shapes() {
        assert_eq!(extract_subject_id("sub-10012_T1w.json"), None);
        assert_eq!(extract_subject_id("T1w_sub-1001.json"), None);
    }

    #[test]
    fn labels_are_normalized_and_split() {
        let labels =
            parse_subject_labels(Some(vec![" sub-1001", "10011", "", "sub-1044"])).unwrap();
        assert_eq!(labels, vec!["1001", "10011", "1044"]);

        let (baseline, scan2) = split_by_cohort(&labels).unwrap();
        assert_eq!(
            baseline.iter().map(SubjectId::label).collect::<Vec<_>>(),
            vec!["1001", "1044"]
        );
        assert_eq!(scan2.iter().map(SubjectId::label).collect::<Vec<_>>(), vec!["10011"]);
    }

    #[test]
    fn empty_label_list_means_no_filter() {
        assert_eq!(parse_subject_labels(Some(Vec::<String>::new())), None);
        assert_eq!(parse_subject_labels(None::<Vec<String>>), None);
    }

    #[test]
    fn bad_label_is_reported_by_name() {
        let err = split_by_cohort(&["1001", "999"]).unwrap_err();
        assert_eq!(err, SubjectError::UnrecognizedLabel("999".to_string()));
    }

    #[test]
    fn subject_id_serializes_as_label() {
        let id = SubjectId::parse("sub-10011").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"10011\"");
        let back: SubjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SubjectId>("\"12\"").is_err());
    }
}
