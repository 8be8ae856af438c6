//! Pipeline configuration.
//!
//! A single value object carries the on-disk layout and tunables; every
//! component receives it (or the paths derived from it) explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::qc::Modality;
use crate::subject::Cohort;

pub const DEFAULT_ARTIFACT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required input `{0}` does not exist")]
    MissingInput(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn default_artifact_timeout_secs() -> u64 {
    DEFAULT_ARTIFACT_TIMEOUT_SECS
}

fn default_lock_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_z_threshold() -> f64 {
    DEFAULT_Z_THRESHOLD
}

fn default_validator_command() -> Vec<String> {
    ["deno", "run", "-ERWN", "jsr:@bids/validator"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the acquisition tree (one `sub-*` directory per subject).
    pub bids_folder: PathBuf,
    /// Working folder holding evidence tables, scripts, logs and reports.
    pub base_folder: PathBuf,
    /// Budget for listing the (possibly network-mounted) report directory.
    #[serde(default = "default_artifact_timeout_secs")]
    pub artifact_timeout_secs: u64,
    /// Per-subject budget for the external QC computation; `None` waits forever.
    #[serde(default)]
    pub qc_timeout_secs: Option<u64>,
    /// How long a ledger writer waits for another writer's lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Outlier flag threshold on |z|.
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    /// Validator program and leading arguments; the BIDS folder is appended.
    #[serde(default = "default_validator_command")]
    pub validator_command: Vec<String>,
}

impl PipelineConfig {
    pub fn new(bids_folder: impl Into<PathBuf>, base_folder: impl Into<PathBuf>) -> Self {
        Self {
            bids_folder: bids_folder.into(),
            base_folder: base_folder.into(),
            artifact_timeout_secs: DEFAULT_ARTIFACT_TIMEOUT_SECS,
            qc_timeout_secs: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            z_threshold: DEFAULT_Z_THRESHOLD,
            validator_command: default_validator_command(),
        }
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "z_threshold must be a positive number, got {}",
                self.z_threshold
            )));
        }
        if self.artifact_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "artifact_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.lock_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "lock_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.qc_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "qc_timeout_secs must be at least 1 (omit it to wait forever)".to_string(),
            ));
        }
        if self.validator_command.is_empty() {
            return Err(ConfigError::Invalid(
                "validator_command must name a program".to_string(),
            ));
        }
        Ok(())
    }

    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_timeout_secs)
    }

    pub fn qc_timeout(&self) -> Option<Duration> {
        self.qc_timeout_secs.map(Duration::from_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    // ------------------------------------------------------------------
    // Derived layout
    // ------------------------------------------------------------------

    pub fn validator_outputs_dir(&self) -> PathBuf {
        self.base_folder.join("validator_outputs")
    }

    pub fn scan_presence_csv(&self, cohort: Cohort) -> PathBuf {
        self.base_folder
            .join(format!("scan_presence_{}_qc.csv", cohort.as_str()))
    }

    pub fn missing_scans_report(&self, cohort: Cohort) -> PathBuf {
        self.base_folder
            .join(format!("missing_scans_report_{}_qc.txt", cohort.as_str()))
    }

    pub fn mriqc_script(&self) -> PathBuf {
        self.base_folder.join("run_mriqc_local.sh")
    }

    pub fn mriqc_logs_dir(&self) -> PathBuf {
        self.base_folder.join("mriqc_local_logs")
    }

    /// Per-subject QC documents (`sub-*/anat`, `sub-*/func`) and HTML reports.
    pub fn mriqc_derivatives_dir(&self) -> PathBuf {
        self.base_folder.join("derivatives").join("mriqc")
    }

    /// Tabular evidence listing every QC result of one modality.
    pub fn evidence_table(&self, modality: Modality) -> PathBuf {
        self.base_folder.join(modality.evidence_file_name())
    }

    /// Dated snapshots and canonical ledgers.
    pub fn group_reports_dir(&self) -> PathBuf {
        self.base_folder.join("weekly_group_reports")
    }
}
