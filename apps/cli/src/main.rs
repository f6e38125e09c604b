//! TrainSync CLI - drive training jobs and follow them live
//!
//! This CLI provides a `tsync` command for starting and controlling jobs on
//! the training service, watching their telemetry, browsing dataset previews
//! and maintaining the local preprocessing-step cache.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use trainsync_core::{ConfigLayer, ControlAction, SyncConfig, SyncError};

use commands::types::{CacheCommand, TrainArgs};
use commands::{Context, cache, jobs, preview, watch};

/// TrainSync CLI - training job control and live telemetry
#[derive(Parser, Debug)]
#[command(name = "tsync", author, version, about = "TrainSync - training job control and live telemetry")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Service base URL (overrides TRAINSYNC_BASE_URL and config files)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Telemetry websocket URL (derived from the base URL when unset)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a training job
    Train(TrainArgs),

    /// Show a job's current state
    Status {
        job_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Pause a running job
    Pause { job_id: String },

    /// Resume a paused job
    Resume { job_id: String },

    /// Stop a job
    Stop { job_id: String },

    /// Follow one or more jobs until they finish
    Watch {
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Emit one JSON object per update
        #[arg(long)]
        json: bool,
    },

    /// Show one page of a dataset preview
    Preview {
        dataset_id: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 50)]
        page_size: u32,

        #[arg(long)]
        json: bool,
    },

    /// List supported model aliases
    Models,

    /// Check that the service is up
    Health,

    /// Local preprocessing-step cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let level = match level.map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("error") => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    eprintln!("{} {}", "error:".red().bold(), err);
    if let Some(sync) = err.downcast_ref::<SyncError>() {
        eprintln!("  {} {}", "hint:".yellow(), sync.remediation().dimmed());
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let overrides = ConfigLayer {
        base_url: args.base_url,
        ws_url: args.ws_url,
        request_timeout_ms: args.timeout_ms,
        log_level: args.log_level,
        ..ConfigLayer::default()
    };
    let config = SyncConfig::load(&overrides)?;
    init_logging(config.log_level.as_deref())?;
    let ctx = Context::new(config);

    match args.command {
        Command::Train(train) => jobs::train(&ctx, train).await,
        Command::Status { job_id, json } => jobs::status(&ctx, &job_id, json).await,
        Command::Pause { job_id } => jobs::control(&ctx, &job_id, ControlAction::Pause).await,
        Command::Resume { job_id } => jobs::control(&ctx, &job_id, ControlAction::Resume).await,
        Command::Stop { job_id } => jobs::control(&ctx, &job_id, ControlAction::Stop).await,
        Command::Watch { job_ids, json } => watch::execute(&ctx, &job_ids, json).await,
        Command::Preview { dataset_id, page, page_size, json } => {
            preview::execute(&ctx, &dataset_id, page, page_size, json).await
        }
        Command::Models => {
            jobs::models();
            Ok(())
        }
        Command::Health => jobs::health(&ctx).await,
        Command::Cache(command) => cache::execute(&ctx, command).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}
