//! orgflow Ingest - JSON to S3 to PostgreSQL pipeline
//!
//! Stage commands print their machine-readable result on stdout; logs go to
//! stderr (or files). Exit code 75 marks a failure the scheduler may retry.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orgflow_common::logging::{init_logging, LogConfig, LogLevel};
use orgflow_ingest::{
    config::PipelineConfig,
    pipeline::{
        new_run_id, validate_run_id, Coordinator, FileHandoff, MemoryHandoff, PipelineRun,
        StageFailure,
    },
    sink::{MemorySink, PgSink},
    storage::{MemoryObjectStore, S3ObjectStore},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// EX_TEMPFAIL
const EXIT_RETRYABLE: u8 = 75;

#[derive(Parser, Debug)]
#[command(name = "orgflow-ingest")]
#[command(author, version, about = "Company document ingestion: local JSON -> S3 -> PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline configuration file (.ini or .toml)
    #[arg(
        short,
        long,
        global = true,
        env = "ORGFLOW_CONFIG",
        default_value = "resources/config.ini"
    )]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and check that the source file exists
    Check,

    /// Upload the source file and record the artifact for the load stage
    Upload {
        /// Run identifier shared with the load stage (generated if omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Load a previously uploaded artifact into the database
    Load {
        /// Run identifier given to the upload stage
        #[arg(long)]
        run_id: String,
    },

    /// Run every stage in this process
    Run {
        #[arg(long)]
        run_id: Option<String>,

        /// Use in-memory object store, database and handoff; nothing leaves the process
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("orgflow-ingest")
        .build()
        .merge_env();

    let _guard = match log_config.and_then(|c| init_logging(&c)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let retryable = e
                .downcast_ref::<StageFailure>()
                .is_some_and(StageFailure::is_retryable);
            error!(retryable, "{:#}", e);

            if retryable {
                ExitCode::from(EXIT_RETRYABLE)
            } else {
                ExitCode::FAILURE
            }
        },
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Check => {
            let run_id = new_run_id();
            let coordinator = live_coordinator(&config).await?;
            coordinator.check_source(&mut PipelineRun::new(&run_id)).await?;
            info!(path = %config.local.json_file_path.display(), "Check passed");
        },
        Command::Upload { run_id } => {
            let run_id = resolve_run_id(run_id)?;
            let coordinator = live_coordinator(&config).await?;

            let mut run = PipelineRun::new(&run_id);
            coordinator.check_source(&mut run).await?;
            let entry = coordinator.upload(&mut run).await?;

            println!(
                "{}",
                serde_json::json!({
                    "run_id": run_id,
                    "artifact_key": entry.artifact_key,
                })
            );
        },
        Command::Load { run_id } => {
            validate_run_id(&run_id)?;
            let coordinator = live_coordinator(&config).await?;
            let sink = PgSink::new(&config.database)?;

            let report = coordinator.load(&run_id, &sink).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        Command::Run { run_id, dry_run } => {
            let run_id = resolve_run_id(run_id)?;

            let report = if dry_run {
                info!(run_id = %run_id, "Dry run: using in-memory store, sink and handoff");
                let coordinator = Coordinator::new(
                    &config,
                    Arc::new(MemoryObjectStore::new(&config.aws.bucket_name)),
                    Arc::new(MemoryHandoff::new()),
                )?
                .without_archive();
                let sink = MemorySink::new(config.database.table_policy);
                coordinator.run(&run_id, &sink).await?
            } else {
                let coordinator = live_coordinator(&config).await?;
                let sink = PgSink::new(&config.database)?;
                coordinator.run(&run_id, &sink).await?
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
        },
    }

    Ok(())
}

fn resolve_run_id(run_id: Option<String>) -> Result<String> {
    match run_id {
        Some(id) => {
            validate_run_id(&id)?;
            Ok(id)
        },
        None => Ok(new_run_id()),
    }
}

async fn live_coordinator(config: &PipelineConfig) -> Result<Coordinator> {
    config.validate().context("Invalid configuration")?;

    let store = S3ObjectStore::new(&config.aws).await?;
    let handoff = FileHandoff::new(&config.local.state_dir);

    Ok(Coordinator::new(config, Arc::new(store), Arc::new(handoff))?)
}
