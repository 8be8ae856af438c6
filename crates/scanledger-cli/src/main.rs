//! Scanledger CLI
//!
//! Weekly QC bookkeeping for a longitudinal MRI study:
//! - Auditing the acquisition tree (which scans exist, which subjects have QC output)
//! - Running the local QC script for subjects that still need it
//! - Aggregating per-subject IQMs into dated snapshots and the canonical ledgers
//! - Summarizing snapshot vs. ledger trends
//! - Running the BIDS validator and keeping its output

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use scanledger_model::{parse_subject_labels, Observers, PipelineConfig, TracingObserver};
use scanledger_storage::{parse_date, today, GroupReports, StorageConfig};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod pipeline;
mod process;
mod progress;
mod qc_runner;
mod validator;

use pipeline::{AggregateOptions, PairOutcome};
use qc_runner::QcRunOptions;
use validator::ValidationStatus;

#[derive(Parser)]
#[command(name = "scanledger")]
#[command(author, version, about = "Scanledger: scan/QC reconciliation and metrics ledger")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// JSON config file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root of the acquisition (BIDS) tree
    #[arg(long, global = true)]
    bids_folder: Option<PathBuf>,
    /// Working folder: evidence tables, QC script, logs and reports
    #[arg(long, global = true)]
    base_folder: Option<PathBuf>,
    /// Log filter (e.g. `debug`, `scanledger_storage=trace`); defaults to RUST_LOG or `info`
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the acquisition tree and write presence tables + missing-scan reports.
    Audit,

    /// Aggregate IQM documents into dated snapshots and upsert the ledgers.
    Aggregate {
        /// Only these subjects (`1001`, `sub-10011`, ...); default is everything found
        #[arg(long, num_args = 1..)]
        subjects: Option<Vec<String>>,
        /// Do not add `outlier__<metric>` flag columns
        #[arg(long)]
        no_outliers: bool,
        /// |z| threshold for outlier flags
        #[arg(long)]
        z_thresh: Option<f64>,
        /// Snapshot date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },

    /// Full weekly run: validate, audit, QC missing subjects, aggregate, report.
    Run {
        /// Print QC commands instead of running them
        #[arg(long)]
        dry_run: bool,
        /// Per-subject QC timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Skip the BIDS validator
        #[arg(long)]
        skip_validation: bool,
        /// Do not ask before running QC
        #[arg(long, short = 'y')]
        yes: bool,
        /// Do not add outlier flag columns
        #[arg(long)]
        no_outliers: bool,
    },

    /// Trend report from an existing snapshot and the ledgers.
    Report {
        /// Snapshot date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },

    /// Run the BIDS validator and save its output.
    Validate,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn resolve_config(global: &GlobalArgs) -> Result<PipelineConfig> {
    let mut config = match &global.config {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            let bids = global
                .bids_folder
                .clone()
                .ok_or_else(|| anyhow!("--bids-folder is required (or pass --config)"))?;
            let base = global
                .base_folder
                .clone()
                .ok_or_else(|| anyhow!("--base-folder is required (or pass --config)"))?;
            PipelineConfig::new(bids, base)
        }
    };
    if let Some(bids) = &global.bids_folder {
        config.bids_folder = bids.clone();
    }
    if let Some(base) = &global.base_folder {
        config.base_folder = base.clone();
    }
    Ok(config)
}

fn observers() -> Observers {
    let mut observers = Observers::new();
    observers.register(Arc::new(TracingObserver));
    if io::stderr().is_terminal() {
        observers.register(Arc::new(progress::ConsoleSpinner));
    }
    observers
}

fn resolve_date(raw: Option<&str>) -> Result<chrono::NaiveDate> {
    match raw {
        Some(raw) => parse_date(raw).map_err(|e| anyhow!("invalid --date `{raw}`: {e}")),
        None => Ok(today()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.log_level.as_deref());
    let mut config = resolve_config(&cli.global)?;

    match cli.command {
        Commands::Audit => {
            config.validate()?;
            cmd_audit(&config)?;
        }
        Commands::Aggregate {
            subjects,
            no_outliers,
            z_thresh,
            date,
        } => {
            if let Some(z) = z_thresh {
                config.z_threshold = z;
            }
            config.validate()?;
            let labels = parse_subject_labels(subjects);
            let options = AggregateOptions {
                labels,
                z_threshold: (!no_outliers).then_some(config.z_threshold),
                date: resolve_date(date.as_deref())?,
            };
            cmd_aggregate(&config, &options)?;
        }
        Commands::Run {
            dry_run,
            timeout,
            skip_validation,
            yes,
            no_outliers,
        } => {
            if timeout.is_some() {
                config.qc_timeout_secs = timeout;
            }
            config.validate()?;
            cmd_run(&config, dry_run, skip_validation, yes, no_outliers)?;
        }
        Commands::Report { date } => {
            config.validate()?;
            cmd_report(&config, resolve_date(date.as_deref())?)?;
        }
        Commands::Validate => {
            config.validate()?;
            let result = validator::validate_bids(&config, today(), &observers())?;
            print_validation(&result);
        }
    }
    Ok(())
}

fn cmd_audit(config: &PipelineConfig) -> Result<()> {
    println!(
        "{} {}",
        "Auditing".green().bold(),
        config.bids_folder.display()
    );
    let run = pipeline::run_audit(config)?;
    if run.degraded {
        println!(
            "  {} report artifacts unavailable; QC status from group tables only",
            "warning:".yellow().bold()
        );
    }
    for audit in &run.audits {
        println!(
            "  {} {}: {} subjects, {} need QC, {} scan failures",
            "→".yellow(),
            audit.cohort,
            audit.rows.len(),
            audit.subjects_needing_qc().len(),
            audit.failures.len()
        );
        println!(
            "    {} {}",
            "wrote".green().bold(),
            config.scan_presence_csv(audit.cohort).display()
        );
        println!(
            "    {} {}",
            "wrote".green().bold(),
            config.missing_scans_report(audit.cohort).display()
        );
    }
    Ok(())
}

fn print_pairs(outcomes: &[PairOutcome]) {
    if outcomes.is_empty() {
        println!("  {} no IQM rows to aggregate", "→".yellow());
    }
    for pair in outcomes {
        println!(
            "  {} {} {}: {} rows -> {}",
            "→".yellow(),
            pair.cohort,
            pair.modality,
            pair.rows,
            pair.snapshot.display()
        );
        println!(
            "    ledger {} rows ({} new, {} superseded){}",
            pair.ledger.rows,
            pair.ledger.rows.saturating_sub(pair.ledger.previous_rows),
            pair.ledger.superseded,
            if pair.ledger.created { ", created" } else { "" }
        );
    }
}

fn cmd_aggregate(config: &PipelineConfig, options: &AggregateOptions) -> Result<()> {
    println!(
        "{} {}",
        "Aggregating".green().bold(),
        config.mriqc_derivatives_dir().display()
    );
    let reports = GroupReports::new(StorageConfig::from(config));
    let outcomes = pipeline::run_aggregate(config, &reports, options)?;
    print_pairs(&outcomes);
    Ok(())
}

fn cmd_report(config: &PipelineConfig, date: chrono::NaiveDate) -> Result<()> {
    let reports = GroupReports::new(StorageConfig::from(config));
    let (report, path) = pipeline::run_report(&reports, date)?;
    print!("{}", report.render());
    eprintln!("{} {}", "wrote".green().bold(), path.display());
    Ok(())
}

fn print_validation(result: &validator::ValidationResult) {
    let status = match result.status {
        ValidationStatus::Success => result.status.as_str().green().bold(),
        ValidationStatus::IssuesFound => result.status.as_str().yellow().bold(),
        ValidationStatus::Failed => result.status.as_str().red().bold(),
    };
    println!("BIDS validation {status} (return code {})", result.return_code);
    println!("  {} {}", "wrote".green().bold(), result.output_file.display());
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (y/n): ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}

fn cmd_run(
    config: &PipelineConfig,
    dry_run: bool,
    skip_validation: bool,
    yes: bool,
    no_outliers: bool,
) -> Result<()> {
    let observers = observers();
    let date = today();

    if !skip_validation {
        println!("{}", "Step 1: BIDS validation".green().bold());
        let result = validator::validate_bids(config, date, &observers)?;
        print_validation(&result);
    }
    if !yes && !confirm("Continue to QC?")? {
        return Ok(());
    }

    println!("{}", "Step 2: audit".green().bold());
    cmd_audit(config)?;
    let targets = pipeline::select_qc_targets(config)?;
    println!("  {} {} subjects to QC", "→".yellow(), targets.len());
    if targets.is_empty() {
        println!("No subjects without QC output. Nothing to run.");
        return Ok(());
    }

    println!("{}", "Step 3: QC".green().bold());
    let summary = qc_runner::run_qc_for_subjects(
        config,
        &targets,
        QcRunOptions {
            dry_run,
            timeout: config.qc_timeout(),
        },
        &observers,
    )?;
    println!(
        "  {} {} ok, {} failed (logs in {})",
        "→".yellow(),
        summary.n_ok,
        summary.n_err,
        summary.logs_dir.display()
    );

    println!("{}", "Step 4: aggregate".green().bold());
    let options = AggregateOptions {
        labels: Some(targets.iter().map(|s| s.label().to_string()).collect()),
        z_threshold: (!no_outliers).then_some(config.z_threshold),
        date,
    };
    cmd_aggregate(config, &options)?;

    println!("{}", "Step 5: trend report".green().bold());
    cmd_report(config, date)?;
    Ok(())
}
