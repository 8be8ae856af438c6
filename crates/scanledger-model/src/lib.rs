//! Shared vocabulary for Scanledger
//!
//! Every other crate speaks in these types:
//! - subject identity and cohort classification (`sub-1001` vs `sub-10011`)
//! - expected scan categories and per-subject presence vectors
//! - QC modalities and the resolved QC status of a subject
//! - flattened metric records and the in-memory `Table` they become
//! - the explicit pipeline configuration object
//! - progress events for long-running external calls
//! - a lossless delimited (TSV/CSV) text codec for tables
//!
//! Nothing here performs I/O except `PipelineConfig::load`.

pub mod config;
pub mod delimited;
pub mod progress;
pub mod qc;
pub mod record;
pub mod scan;
pub mod subject;
pub mod table;

pub use config::{ConfigError, PipelineConfig};
pub use delimited::TableError;
pub use progress::{
    NoopObserver, Observers, ProgressEvent, ProgressKind, ProgressObserver, TracingObserver,
};
pub use qc::{Modality, QcStatus};
pub use record::{MetricRecord, MetricValue};
pub use scan::{PresenceVector, ScanCategory};
pub use subject::{
    classify_subject, extract_subject_id, parse_subject_labels, split_by_cohort, Cohort,
    SubjectClass, SubjectError, SubjectId,
};
pub use table::Table;

// ============================================================================
// Column naming
// ============================================================================

/// Subject label column of metric tables (`1001`, without the `sub-` prefix).
pub const PARTICIPANT_ID_COLUMN: &str = "participant_id";
/// Source-record identity column: the originating result file's name.
pub const FILE_NAME_COLUMN: &str = "file_name";
/// Provenance column: full path of the originating result document.
pub const SOURCE_COLUMN: &str = "source_json";
/// Marker column carried by rows whose source document could not be read.
pub const READ_ERROR_COLUMN: &str = "__read_error__";
/// Prefix of the derived outlier flag columns (`outlier__<metric>`).
pub const OUTLIER_PREFIX: &str = "outlier__";

/// Ledger key: one row per (subject, source record).
pub const KEY_COLUMNS: [&str; 2] = [PARTICIPANT_ID_COLUMN, FILE_NAME_COLUMN];

/// Identifier columns, always first and in this order.
pub const IDENTIFIER_COLUMNS: [&str; 3] = [PARTICIPANT_ID_COLUMN, FILE_NAME_COLUMN, SOURCE_COLUMN];
