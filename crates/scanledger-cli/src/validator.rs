//! BIDS validator adapter.
//!
//! Runs the configured validator on the acquisition tree and keeps its
//! output in `validator_outputs/bids_validator_output_<date>.txt`. The text is
//! stored for a human to read; nothing here interprets it beyond the exit code.

use crate::process::run_with_timeout;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use scanledger_model::{Observers, PipelineConfig};
use scanledger_storage::DATE_FORMAT;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    /// Exit code 0.
    Success,
    /// The validator ran and reported problems.
    IssuesFound,
    /// The validator could not be run at all.
    Failed,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Success => "SUCCESS",
            ValidationStatus::IssuesFound => "ISSUES_FOUND",
            ValidationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub output_file: PathBuf,
}

pub fn render_output(return_code: i32, stdout: &str, stderr: &str) -> String {
    format!("RETURN CODE:\n{return_code}\n\nSTDOUT:\n{stdout}\n\nSTDERR:\n{stderr}\n")
}

pub fn validate_bids(
    config: &PipelineConfig,
    date: NaiveDate,
    observers: &Observers,
) -> Result<ValidationResult> {
    let output_dir = config.validator_outputs_dir();
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let output_file = output_dir.join(format!(
        "bids_validator_output_{}.txt",
        date.format(DATE_FORMAT)
    ));

    let (program, leading) = config
        .validator_command
        .split_first()
        .context("validator_command is empty")?;
    let mut cmd = Command::new(program);
    cmd.args(leading).arg(&config.bids_folder);

    let (status, return_code, stdout, stderr) =
        match run_with_timeout(cmd, None, "bids validator", observers) {
            Ok(output) => {
                let code = output.code.unwrap_or(-1);
                let status = if code == 0 {
                    ValidationStatus::Success
                } else {
                    ValidationStatus::IssuesFound
                };
                (status, code, output.stdout, output.stderr)
            }
            Err(err) => (ValidationStatus::Failed, 1, String::new(), format!("{err:#}")),
        };

    fs::write(&output_file, render_output(return_code, &stdout, &stderr))
        .with_context(|| format!("failed to write {}", output_file.display()))?;
    tracing::info!(status = %status, output = %output_file.display(), "BIDS validation finished");

    Ok(ValidationResult {
        status,
        return_code,
        stdout,
        stderr,
        output_file,
    })
}
