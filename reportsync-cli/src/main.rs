//! ReportSync CLI: run, status and inline commands.
//!
//! Commands:
//! - `run`: process every unmarked run folder of a date
//! - `status`: list a date's run folders and their marker state
//! - `inline`: make the report pages under a prefix self-contained
//!
//! Exit status is non-zero only for startup failures (bad config, missing
//! credentials) and for failing to enumerate the date's folders.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use reportsync_core::inline::HtmlInliner;
use reportsync_core::service::HttpConnector;
use reportsync_core::store::FsStore;
use reportsync_runner::config::parse_date;
use reportsync_runner::{folder_status, Pipeline, StdoutProgress, SyncConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reportsync",
    about = "ReportSync CLI: turn test run folders into self-contained reports"
)]
struct Cli {
    /// Log filter (e.g. `info`, `reportsync_runner=debug`). Falls back to RUST_LOG, then `warn`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every unmarked run folder of a date.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Date to process (YYYY-MM-DD). Defaults to TARGET_DATE, then today.
        #[arg(long)]
        date: Option<String>,

        /// Bucket holding the run folders.
        #[arg(long)]
        source_bucket: Option<String>,

        /// Bucket holding the staging area and the generated report.
        #[arg(long)]
        staging_bucket: Option<String>,

        /// Root directory of the filesystem store.
        #[arg(long)]
        store_root: Option<PathBuf>,
    },
    /// List a date's run folders and whether each is marked done.
    Status {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Date to inspect (YYYY-MM-DD). Defaults to TARGET_DATE, then today.
        #[arg(long)]
        date: Option<String>,

        /// Root directory of the filesystem store.
        #[arg(long)]
        store_root: Option<PathBuf>,
    },
    /// Inline the data files of every report page under a prefix.
    Inline {
        /// Bucket holding the report.
        #[arg(long)]
        bucket: String,

        /// Report prefix, e.g. Result/consul/2024-05-01/run-07/allure-report/.
        #[arg(long)]
        prefix: String,

        /// Root directory of the filesystem store.
        #[arg(long, default_value = "store")]
        store_root: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run {
            config,
            date,
            source_bucket,
            staging_bucket,
            store_root,
        } => {
            let mut config = load_config(config)?;
            if let Some(bucket) = source_bucket {
                config.source_bucket = bucket;
            }
            if let Some(bucket) = staging_bucket {
                config.staging_bucket = bucket;
            }
            if let Some(root) = store_root {
                config.store_root = root;
            }
            run_pipeline(&config, date.as_deref())
        }
        Commands::Status {
            config,
            date,
            store_root,
        } => {
            let mut config = load_config(config)?;
            if let Some(root) = store_root {
                config.store_root = root;
            }
            run_status(&config, date.as_deref())
        }
        Commands::Inline {
            bucket,
            prefix,
            store_root,
        } => run_inline(&bucket, &prefix, store_root),
    }
}

/// File (if any), then environment.
fn load_config(path: Option<PathBuf>) -> Result<SyncConfig> {
    let mut config = match path {
        Some(path) => SyncConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn resolve_date(config: &SyncConfig, flag: Option<&str>) -> Result<NaiveDate> {
    let today = chrono::Local::now().date_naive();
    match flag {
        Some(value) => Ok(parse_date(value)?),
        None => Ok(config.date_or(today)),
    }
}

fn run_pipeline(config: &SyncConfig, date: Option<&str>) -> Result<()> {
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {e}");
    }
    let date = resolve_date(config, date)?;

    let store = FsStore::new(&config.store_root);
    let connector = HttpConnector::new(config.service_settings());
    let progress = StdoutProgress;

    tracing::info!(
        %date,
        store_root = %config.store_root.display(),
        region = %config.region,
        "starting pass"
    );
    println!(
        "Processing {} in {} (staging: {})",
        date, config.source_bucket, config.staging_bucket
    );
    let summary = Pipeline::new(config, &store, &connector, &progress).run(date)?;

    if summary.failed > 0 || summary.lookup_errors > 0 {
        eprintln!(
            "{} folder(s) failed and {} marker lookup(s) errored; see log output",
            summary.failed, summary.lookup_errors
        );
    }
    Ok(())
}

fn run_status(config: &SyncConfig, date: Option<&str>) -> Result<()> {
    let date = resolve_date(config, date)?;
    let store = FsStore::new(&config.store_root);
    let statuses = folder_status(&store, &config.source_bucket, &config.run_root, date)?;

    if statuses.is_empty() {
        println!("No run folders for {date} in {}", config.source_bucket);
        return Ok(());
    }
    println!("{:<40} {}", "Folder", "State");
    println!("{}", "-".repeat(56));
    for status in &statuses {
        let state = match &status.marked {
            Ok(true) => "done".to_string(),
            Ok(false) => "pending".to_string(),
            Err(e) => format!("unknown ({e})"),
        };
        println!("{:<40} {state}", status.folder.name);
    }
    let done = statuses
        .iter()
        .filter(|s| matches!(s.marked, Ok(true)))
        .count();
    println!("\n{done}/{} folders done", statuses.len());
    Ok(())
}

fn run_inline(bucket: &str, prefix: &str, store_root: PathBuf) -> Result<()> {
    let store = FsStore::new(store_root);
    let report = HtmlInliner::new(&store, bucket).process_report_folder(prefix)?;

    for doc in &report.documents {
        println!(
            "{}: {} data files, {} call sites{}",
            doc.key,
            doc.inlined,
            doc.replaced,
            if doc.written { "" } else { " (unchanged)" }
        );
        for skipped in &doc.skipped {
            println!("  skipped {}: {}", skipped.key, skipped.reason);
        }
    }
    for (key, err) in &report.failures {
        eprintln!("{key}: {err}");
    }
    println!(
        "\n{} of {} pages rewritten",
        report.inlined_documents(),
        report.documents.len() + report.failures.len()
    );
    Ok(())
}
