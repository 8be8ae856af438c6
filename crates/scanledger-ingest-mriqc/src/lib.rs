//! QC output ingestion for Scanledger.
//!
//! Two halves:
//!
//! - **status**: which subjects have QC output at all. Evidence comes from
//!   the group tables (`group_T1w.tsv`, `group_bold.tsv`) and from a listing
//!   of the per-subject HTML reports; either source alone is enough.
//! - **metrics**: per-subject IQM documents flattened into rows, the batch
//!   table built from them, z-score outlier flags, and per-panel trend
//!   summaries comparing a dated snapshot to the full ledger.

pub mod evidence;
pub mod iqm;
pub mod outliers;
pub mod status;
pub mod trend;

pub use evidence::{ArtifactIndex, EvidenceError, TabularEvidence, BIDS_NAME_COLUMN};
pub use iqm::{aggregate_iqms, extract_record, find_iqm_documents, flatten_document};
pub use outliers::{annotate_outliers, numeric_columns, MIN_NON_MISSING};
pub use status::QcEvaluator;
pub use trend::{
    default_metrics, MetricSummary, PanelKind, PanelSummary, SeriesStats, TrendReport,
};
