//! Acquisition tree ingestion for Scanledger.
//!
//! - `scanner`: per-subject presence vectors from the raw file tree
//! - `audit`: subject discovery, per-cohort presence + QC status tables, and
//!   the human-readable missing-scan report
//! - `presence`: reading presence tables back and selecting subjects that
//!   still need QC
//!
//! Nothing here knows where QC status comes from; callers pass a status
//! lookup, so the QC evidence crate stays independent of this one.

pub mod audit;
pub mod presence;
pub mod scanner;

pub use audit::{
    audit_cohort, discover_subjects, AuditFailure, CohortAudit, DiscoveredSubjects, SubjectAudit,
    MRIQC_COLUMN, SUBJECT_COLUMN,
};
pub use presence::{
    load_presence_table, load_presence_tables, presence_row_status, subjects_needing_qc,
    PresenceError,
};
pub use scanner::{scan_subject, ScanError, ScanPatterns};
