//! Per-subject invocation of the local QC script (`run_mriqc_local.sh <id>`).

use crate::process::run_with_timeout;
use anyhow::{Context, Result};
use colored::Colorize;
use scanledger_model::{ConfigError, Observers, PipelineConfig, SubjectId};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct QcRunOptions {
    /// Print each command instead of running it.
    pub dry_run: bool,
    /// Per-subject budget; a subject that exceeds it counts as an error.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: Vec<SubjectId>,
    pub n_ok: usize,
    pub n_err: usize,
    pub logs_dir: PathBuf,
}

pub fn qc_command(script: &Path, subject: &SubjectId) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg(script).arg(subject.label());
    if let Some(dir) = script.parent().filter(|p| !p.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }
    cmd
}

pub fn log_paths(logs_dir: &Path, subject: &SubjectId) -> (PathBuf, PathBuf) {
    (
        logs_dir.join(format!("mriqc_{}.out.txt", subject.label())),
        logs_dir.join(format!("mriqc_{}.err.txt", subject.label())),
    )
}

/// Run the QC script once per target, in order.
///
/// A missing script aborts before anything runs. A subject that fails to
/// start, exits non-zero or times out is counted in `n_err` and the batch
/// moves on.
pub fn run_qc_for_subjects(
    config: &PipelineConfig,
    targets: &[SubjectId],
    options: QcRunOptions,
    observers: &Observers,
) -> Result<RunSummary> {
    let script = config.mriqc_script();
    if !script.is_file() {
        return Err(ConfigError::MissingInput(script).into());
    }
    let script = fs::canonicalize(&script).unwrap_or(script);
    let logs_dir = config.mriqc_logs_dir();
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;

    let mut summary = RunSummary {
        targets: targets.to_vec(),
        n_ok: 0,
        n_err: 0,
        logs_dir: logs_dir.clone(),
    };

    for subject in targets {
        let cmd = qc_command(&script, subject);
        if options.dry_run {
            println!(
                "{} bash {} {}",
                "[dry run]".yellow().bold(),
                script.display(),
                subject.label()
            );
            continue;
        }

        let task = format!("qc {}", subject.label());
        let output = match run_with_timeout(cmd, options.timeout, &task, observers) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(subject = %subject, error = %err, "QC run could not start");
                summary.n_err += 1;
                continue;
            }
        };

        let (out_path, err_path) = log_paths(&logs_dir, subject);
        let mut stderr = output.stderr.clone();
        if output.timed_out {
            let limit = options.timeout.map(|t| t.as_secs()).unwrap_or_default();
            stderr.push_str(&format!("\n[scanledger] timed out after {limit}s\n"));
        }
        fs::write(&out_path, &output.stdout)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        fs::write(&err_path, &stderr)
            .with_context(|| format!("failed to write {}", err_path.display()))?;

        if output.success() {
            summary.n_ok += 1;
            tracing::info!(subject = %subject, log = %out_path.display(), "QC run finished");
        } else {
            summary.n_err += 1;
            tracing::warn!(
                subject = %subject,
                code = ?output.code,
                timed_out = output.timed_out,
                log = %err_path.display(),
                "QC run failed"
            );
        }
    }

    Ok(summary)
}
