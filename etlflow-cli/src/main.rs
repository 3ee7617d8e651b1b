//! etlflow CLI - runs the extract/transform/provision/load pipeline.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use etlflow::observability::{init_logging, LogFormat};
use etlflow::pipeline::{exit_status, run_trigger};
use etlflow::prelude::*;
use etlflow::record::JsonlRunRecordStore;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "etlflow", version, about = "Scheduled extract/transform/load pipeline runner")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "etlflow.toml", global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// File run records are appended to
        #[arg(long, default_value = "etlflow-runs.jsonl")]
        records: PathBuf,
    },
    /// Run the pipeline on the configured interval until interrupted
    Schedule {
        /// File run records are appended to
        #[arg(long, default_value = "etlflow-runs.jsonl")]
        records: PathBuf,

        /// Override the configured interval, in seconds
        #[arg(long)]
        interval_seconds: Option<u64>,
    },
    /// Validate the configuration and the stage chain without running
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let format: LogFormat = cli.log_format.parse().map_err(|e: String| anyhow!(e))?;
    init_logging(&cli.log_level, format).context("failed to initialise logging")?;

    let config = PipelineConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    info!(config = %cli.config.display(), pipeline = %config.pipeline_name, "Loaded configuration");

    if config.compute_endpoint != "local" {
        bail!(
            "compute_endpoint '{}' is not supported; only 'local' is available",
            config.compute_endpoint
        );
    }

    match cli.command {
        Commands::Check => check(&config),
        Commands::Run { records } => {
            let runner = build_runner(config, &records).await?;
            let cancel = shutdown_token();
            let result = runner.run(&cancel).await;
            if let Ok(record) = &result {
                print_summary(record);
            }
            let code = exit_status(&result);
            if let Err(e) = result {
                eprintln!("Error: {e}");
            }
            Ok(ExitCode::from(code))
        }
        Commands::Schedule {
            records,
            interval_seconds,
        } => {
            let interval = interval_seconds.map_or_else(
                || config.schedule.interval(),
                std::time::Duration::from_secs,
            );
            if interval.is_zero() {
                bail!("interval must be greater than zero");
            }
            let runner = build_runner(config, &records).await?;
            let cancel = shutdown_token();
            let report = run_trigger(&runner, Trigger::Every(interval), &cancel).await?;
            println!(
                "runs completed: {}, aborted: {}, skipped (locked): {}",
                report.completed, report.aborted, report.skipped_locked
            );
            Ok(if report.aborted > 0 {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn check(config: &PipelineConfig) -> anyhow::Result<ExitCode> {
    let (collaborators, _warehouse) = Collaborators::local(config);
    let chain = standard_chain(config, &collaborators).context("stage chain is invalid")?;
    println!("pipeline: {}", chain.name());
    for entry in chain.entries() {
        println!("  {} ({}, {:?})", entry.stage.name(), entry.stage.kind(), entry.stage.idempotency());
    }
    println!("fact table: {}", config.warehouse_target.qualified_fact_table());
    println!("schedule: every {}s", config.schedule.interval_seconds);
    if config.extract.sources.is_empty() {
        warn!("No sources configured; extract will fail");
    }
    Ok(ExitCode::SUCCESS)
}

async fn build_runner(config: PipelineConfig, records: &Path) -> anyhow::Result<PipelineRunner> {
    let (collaborators, _warehouse) = Collaborators::local(&config);
    let chain = standard_chain(&config, &collaborators).context("stage chain is invalid")?;
    let store = JsonlRunRecordStore::open(records)
        .await
        .with_context(|| format!("failed to open run records at {}", records.display()))?;

    let runner = PipelineRunner::new(config, chain)?
        .with_record_store(Arc::new(store))
        .with_event_sink(Arc::new(LoggingEventSink::default()));
    Ok(runner)
}

/// A token cancelled on Ctrl-C.
fn shutdown_token() -> Arc<CancellationToken> {
    let cancel = Arc::new(CancellationToken::new());
    let handle = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling after the current stage");
            handle.cancel("interrupted");
        }
    });
    cancel
}

fn print_summary(record: &RunRecord) {
    println!("run {} {}", record.run_id, record.state);
    for entry in &record.entries {
        let outcome = entry.outcome.as_ref().map_or("open", StageOutcome::label);
        println!("  {:<18} {:<16} attempts={}", entry.stage, outcome, entry.attempt_count());
        if let Some(cause) = entry.outcome.as_ref().and_then(StageOutcome::cause) {
            println!("    cause: {cause}");
        }
    }
}
