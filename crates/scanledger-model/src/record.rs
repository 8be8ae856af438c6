//! Metric values and flattened per-subject metric records.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::subject::SubjectId;
use crate::READ_ERROR_COLUMN;

/// One cell of a metric table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    #[default]
    Missing,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// NaN is stored as `Missing` so rendering never produces `NaN`.
    pub fn number(v: f64) -> Self {
        if v.is_nan() {
            MetricValue::Missing
        } else {
            MetricValue::Number(v)
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        MetricValue::Text(s.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric reading of a cell, also accepting text such as `3.0` or
    /// `1e-05` that was kept as text on read-back. Non-finite values are
    /// rejected.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, MetricValue::Missing)
    }

    /// Textual form written to tabular files.
    ///
    /// Booleans use `True`/`False` so existing ledgers stay readable by the
    /// spreadsheet tooling that produced them.
    pub fn render(&self) -> String {
        match self {
            MetricValue::Missing => String::new(),
            MetricValue::Bool(true) => "True".to_string(),
            MetricValue::Bool(false) => "False".to_string(),
            MetricValue::Number(v) => format!("{v}"),
            MetricValue::Text(s) => s.clone(),
        }
    }

    /// Inverse of `render` that never changes the text.
    ///
    /// A cell only becomes a number when rendering that number reproduces the
    /// input exactly (`0123` and `1.50` stay text), so re-writing a table that
    /// was read from disk yields identical bytes.
    pub fn parse_lossless(raw: &str) -> Self {
        match raw {
            "" => MetricValue::Missing,
            "True" => MetricValue::Bool(true),
            "False" => MetricValue::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(v) if !v.is_nan() && format!("{v}") == raw => MetricValue::Number(v),
                _ => MetricValue::Text(raw.to_string()),
            },
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// One flattened QC result: a subject, the result file it came from, and its
/// metrics keyed by dotted path (`summary_bg.mean`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub subject: SubjectId,
    /// Originating result file name; distinguishes several BOLD runs of one subject.
    pub source_file: String,
    pub metrics: BTreeMap<String, MetricValue>,
    pub provenance: PathBuf,
}

impl MetricRecord {
    pub fn new(subject: SubjectId, provenance: &Path) -> Self {
        let source_file = provenance
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            subject,
            source_file,
            metrics: BTreeMap::new(),
            provenance: provenance.to_path_buf(),
        }
    }

    /// A record that could not be read: no metrics, only the error marker.
    pub fn read_error(subject: SubjectId, provenance: &Path, error: impl Into<String>) -> Self {
        let mut record = Self::new(subject, provenance);
        record
            .metrics
            .insert(READ_ERROR_COLUMN.to_string(), MetricValue::Text(error.into()));
        record
    }

    pub fn read_error_message(&self) -> Option<&str> {
        match self.metrics.get(READ_ERROR_COLUMN) {
            Some(MetricValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_lossless_for_awkward_numbers() {
        for raw in ["0123", "1.50", "1e3", "+4", "-0", " 7", "NaN", "inf"] {
            let value = MetricValue::parse_lossless(raw);
            assert_eq!(value.render(), raw, "{raw} -> {value:?}");
        }
    }

    #[test]
    fn parse_recognizes_canonical_values() {
        assert_eq!(MetricValue::parse_lossless("3"), MetricValue::Number(3.0));
        assert_eq!(MetricValue::parse_lossless("0.25"), MetricValue::Number(0.25));
        assert_eq!(MetricValue::parse_lossless("-1.5"), MetricValue::Number(-1.5));
        assert_eq!(MetricValue::parse_lossless("True"), MetricValue::Bool(true));
        assert_eq!(MetricValue::parse_lossless(""), MetricValue::Missing);
        assert_eq!(
            MetricValue::parse_lossless("sub-1001"),
            MetricValue::Text("sub-1001".to_string())
        );
    }

    #[test]
    fn nan_is_missing() {
        assert_eq!(MetricValue::number(f64::NAN), MetricValue::Missing);
    }

    #[test]
    fn record_identity_comes_from_the_file_name() {
        let subject = SubjectId::parse("10011").unwrap();
        let path = Path::new("/deriv/sub-10011/func/sub-10011_task-rest_bold.json");
        let record = MetricRecord::read_error(subject, path, "SyntaxError: bad json");
        assert_eq!(record.source_file, "sub-10011_task-rest_bold.json");
        assert_eq!(record.read_error_message(), Some("SyntaxError: bad json"));
    }
}
