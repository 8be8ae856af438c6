//! Per-subject IQM documents: discovery, flattening and batch tables.
//!
//! Documents live at `sub-*/anat/sub-*_T1w.json` and
//! `sub-*/func/sub-*_bold.json` under the derivatives directory. Each one is
//! a nested JSON object; nested keys are joined with `.` into flat metric
//! names (`summary_bg.mean`), so documents of any shape become rows.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use scanledger_model::{
    extract_subject_id, Cohort, MetricRecord, MetricValue, Modality, SubjectId, Table,
    IDENTIFIER_COLUMNS, OUTLIER_PREFIX, READ_ERROR_COLUMN,
};
use serde_json::Value;

const KEY_SEPARATOR: char = '.';
/// Column used when a document's root is not an object.
const SCALAR_ROOT_KEY: &str = "value";
/// Prefix for document keys that would shadow a column this crate owns.
const SHADOWED_KEY_PREFIX: &str = "iqm.";

fn is_reserved_column(key: &str) -> bool {
    IDENTIFIER_COLUMNS.contains(&key) || key == READ_ERROR_COLUMN || key.starts_with(OUTLIER_PREFIX)
}

/// Move keys such as `participant_id` or `outlier__snr` out of the way, so a
/// row's identity always comes from its file name and derived columns are
/// never pre-filled by the document.
fn rename_reserved_keys(flat: BTreeMap<String, MetricValue>) -> BTreeMap<String, MetricValue> {
    let mut out = BTreeMap::new();
    for (key, value) in flat {
        if is_reserved_column(&key) {
            let mut renamed = format!("{SHADOWED_KEY_PREFIX}{key}");
            while out.contains_key(&renamed) {
                renamed.insert_str(0, SHADOWED_KEY_PREFIX);
            }
            tracing::debug!(key = %key, renamed = %renamed, "renamed reserved IQM key");
            out.insert(renamed, value);
        } else {
            out.insert(key, value);
        }
    }
    out
}

/// Flatten a JSON document into dotted-path metrics.
///
/// Objects recurse; everything else is a leaf. Arrays are kept as their JSON
/// text, `null` becomes missing. An empty object contributes nothing.
pub fn flatten_document(document: &Value) -> BTreeMap<String, MetricValue> {
    let mut out = BTreeMap::new();
    match document {
        Value::Object(_) => flatten_into(document, "", &mut out),
        leaf => {
            out.insert(SCALAR_ROOT_KEY.to_string(), leaf_value(leaf));
        }
    }
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, MetricValue>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}{KEY_SEPARATOR}{key}")
                };
                flatten_into(child, &path, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf_value(leaf));
        }
    }
}

fn leaf_value(value: &Value) -> MetricValue {
    match value {
        Value::Null => MetricValue::Missing,
        Value::Bool(b) => MetricValue::Bool(*b),
        Value::Number(n) => n.as_f64().map(MetricValue::number).unwrap_or_default(),
        Value::String(s) => MetricValue::text(s.clone()),
        Value::Array(_) | Value::Object(_) => MetricValue::text(value.to_string()),
    }
}

/// Read and flatten one document.
///
/// Returns `None` only when the file name carries no cohort-shaped subject.
/// An unreadable or malformed document still yields a record, carrying the
/// read-error marker instead of metrics, so the failure shows up in the
/// ledger.
pub fn extract_record(path: &Path) -> Option<MetricRecord> {
    let file_name = path.file_name()?.to_string_lossy();
    let subject = extract_subject_id(&file_name)?;

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable IQM document");
            return Some(MetricRecord::read_error(
                subject,
                path,
                format!("IoError: {err}"),
            ));
        }
    };
    let document: Value = match serde_json::from_str(&text) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "malformed IQM document");
            return Some(MetricRecord::read_error(
                subject,
                path,
                format!("JsonError: {err}"),
            ));
        }
    };

    let mut record = MetricRecord::new(subject, path);
    record.metrics = rename_reserved_keys(flatten_document(&document));
    Some(record)
}

/// Locate IQM documents of one modality for one cohort, sorted by path.
///
/// `labels == None` means every subject of the cohort; `Some(&[])` means
/// none. Files whose subject belongs to the other cohort are never returned.
pub fn find_iqm_documents(
    deriv_dir: &Path,
    modality: Modality,
    cohort: Cohort,
    labels: Option<&[SubjectId]>,
) -> std::io::Result<Vec<PathBuf>> {
    let wanted: Option<HashSet<&SubjectId>> = labels.map(|l| l.iter().collect());
    if wanted.as_ref().is_some_and(HashSet::is_empty) {
        return Ok(Vec::new());
    }
    if !deriv_dir.is_dir() {
        tracing::warn!(dir = %deriv_dir.display(), "derivatives directory not found");
        return Ok(Vec::new());
    }

    let suffix = modality.document_suffix();
    let mut found = Vec::new();
    for entry in fs::read_dir(deriv_dir)? {
        let entry = entry?;
        let subject_dir_name = entry.file_name().to_string_lossy().to_string();
        if !subject_dir_name.starts_with("sub-") {
            continue;
        }
        let modality_dir = entry.path().join(modality.derivatives_subdir());
        if !modality_dir.is_dir() {
            continue;
        }
        let listing = match fs::read_dir(&modality_dir) {
            Ok(listing) => listing,
            Err(err) => {
                tracing::warn!(dir = %modality_dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };
        for doc in listing.flatten() {
            let name = doc.file_name().to_string_lossy().to_string();
            if !name.starts_with("sub-") || !name.ends_with(&suffix) {
                continue;
            }
            let Some(subject) = extract_subject_id(&name) else {
                continue;
            };
            if subject.cohort() != cohort {
                continue;
            }
            if let Some(wanted) = &wanted {
                if !wanted.contains(&subject) {
                    continue;
                }
            }
            found.push(doc.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Build the batch table for one (cohort, modality) pair.
///
/// Rows are sorted by (`participant_id`, `file_name`); the identifier
/// columns come first. An empty batch still has the identifier columns.
pub fn aggregate_iqms(
    deriv_dir: &Path,
    modality: Modality,
    cohort: Cohort,
    labels: Option<&[SubjectId]>,
) -> std::io::Result<Table> {
    let documents = find_iqm_documents(deriv_dir, modality, cohort, labels)?;
    let mut records: Vec<MetricRecord> = documents
        .par_iter()
        .filter_map(|path| extract_record(path))
        .collect();
    records.sort_by(|a, b| {
        a.subject
            .label()
            .cmp(b.subject.label())
            .then_with(|| a.source_file.cmp(&b.source_file))
    });

    let failed = records.iter().filter(|r| r.read_error_message().is_some()).count();
    tracing::info!(
        cohort = %cohort,
        modality = %modality,
        documents = documents.len(),
        rows = records.len(),
        failed,
        "aggregated IQM documents"
    );
    Ok(Table::from_records(&records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanledger_model::{READ_ERROR_COLUMN, SOURCE_COLUMN};
    use serde_json::json;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn nested_keys_become_dotted_columns() {
        let doc = json!({
            "snr": 12.5,
            "summary_bg": { "mean": 3.0, "k": { "deep": true } },
            "bids_meta": { "TaskName": "rest", "SliceTiming": [0.0, 0.5], "Empty": {} },
            "nothing": null,
        });
        let flat = flatten_document(&doc);
        assert_eq!(flat["snr"], MetricValue::Number(12.5));
        assert_eq!(flat["summary_bg.mean"], MetricValue::Number(3.0));
        assert_eq!(flat["summary_bg.k.deep"], MetricValue::Bool(true));
        assert_eq!(flat["bids_meta.TaskName"], MetricValue::text("rest"));
        assert_eq!(flat["bids_meta.SliceTiming"], MetricValue::text("[0.0,0.5]"));
        assert_eq!(flat["nothing"], MetricValue::Missing);
        assert!(!flat.keys().any(|k| k.starts_with("bids_meta.Empty")));
    }

    #[test]
    fn scalar_root_is_one_column() {
        let flat = flatten_document(&json!(42));
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[SCALAR_ROOT_KEY], MetricValue::Number(42.0));
    }

    #[test]
    fn document_keys_never_override_row_identity() {
        let dir = tempfile::tempdir().unwrap();
        let deriv = dir.path();
        write(
            &deriv.join("sub-1001/anat/sub-1001_T1w.json"),
            r#"{"cjv": 0.4, "file_name": "other.json", "participant_id": "9999",
                "source_json": "x", "__read_error__": "no", "outlier__cjv": true}"#,
        );

        let table = aggregate_iqms(deriv, Modality::T1w, Cohort::Baseline, None).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.cell(0, "participant_id"), Some(&MetricValue::text("1001")));
        assert_eq!(table.cell(0, "file_name"), Some(&MetricValue::text("sub-1001_T1w.json")));
        assert!(table.cell(0, SOURCE_COLUMN).unwrap().render().ends_with("sub-1001_T1w.json"));
        assert_eq!(table.cell(0, "iqm.participant_id"), Some(&MetricValue::text("9999")));
        assert_eq!(table.cell(0, "iqm.file_name"), Some(&MetricValue::text("other.json")));
        assert_eq!(table.cell(0, "iqm.outlier__cjv"), Some(&MetricValue::Bool(true)));
        assert!(!table.has_column(READ_ERROR_COLUMN));
        assert!(!table.has_column("outlier__cjv"));
    }

    #[test]
    fn malformed_document_becomes_an_error_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub-1001_T1w.json");
        write(&path, "{ not json");
        let record = extract_record(&path).unwrap();
        assert_eq!(record.subject.label(), "1001");
        assert!(record.read_error_message().unwrap().starts_with("JsonError: "));
        assert_eq!(record.metrics.len(), 1);
    }

    #[test]
    fn discovery_respects_cohort_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let deriv = dir.path();
        write(&deriv.join("sub-1001/anat/sub-1001_T1w.json"), "{}");
        write(&deriv.join("sub-1002/anat/sub-1002_T1w.json"), "{}");
        write(&deriv.join("sub-10011/anat/sub-10011_T1w.json"), "{}");
        write(&deriv.join("sub-1001/func/sub-1001_task-rest_bold.json"), "{}");
        write(&deriv.join("sub-1001/anat/sub-1001_T1w.html"), "");

        let all = find_iqm_documents(deriv, Modality::T1w, Cohort::Baseline, None).unwrap();
        let names: Vec<_> = all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["sub-1001_T1w.json", "sub-1002_T1w.json"]);

        let scan2 = find_iqm_documents(deriv, Modality::T1w, Cohort::Scan2, None).unwrap();
        assert_eq!(scan2.len(), 1);

        let only = [SubjectId::parse("1002").unwrap()];
        let some = find_iqm_documents(deriv, Modality::T1w, Cohort::Baseline, Some(&only[..])).unwrap();
        assert_eq!(some.len(), 1);

        let none = find_iqm_documents(deriv, Modality::T1w, Cohort::Baseline, Some(&[][..])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn batch_table_is_sorted_with_identifiers_first() {
        let dir = tempfile::tempdir().unwrap();
        let deriv = dir.path();
        write(
            &deriv.join("sub-1002/func/sub-1002_task-rest_bold.json"),
            r#"{"snr": 40.0, "fd_mean": 0.1}"#,
        );
        write(
            &deriv.join("sub-1001/func/sub-1001_task-ta_bold.json"),
            r#"{"snr": 35.5}"#,
        );
        write(
            &deriv.join("sub-1001/func/sub-1001_task-rest_bold.json"),
            r#"{"snr": 38.0, "dvars_nstd": 1.2}"#,
        );

        let table = aggregate_iqms(deriv, Modality::Bold, Cohort::Baseline, None).unwrap();
        assert_eq!(&table.columns()[..3], ["participant_id", "file_name", SOURCE_COLUMN]);
        let keys: Vec<String> = table
            .rows()
            .iter()
            .map(|r| format!("{}/{}", r[0].render(), r[1].render()))
            .collect();
        assert_eq!(
            keys,
            vec![
                "1001/sub-1001_task-rest_bold.json",
                "1001/sub-1001_task-ta_bold.json",
                "1002/sub-1002_task-rest_bold.json",
            ]
        );
        assert!(!table.has_column(READ_ERROR_COLUMN));
        assert_eq!(table.cell(1, "dvars_nstd"), Some(&MetricValue::Missing));
    }

    #[test]
    fn missing_derivatives_dir_is_an_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let table =
            aggregate_iqms(&dir.path().join("absent"), Modality::T1w, Cohort::Baseline, None)
                .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 3);
    }
}
