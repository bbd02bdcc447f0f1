//! attachd - transit gateway attachment associator
//!
//! Reads newline-delimited attachment-creation events and associates each
//! attachment with its route table. Events are handled concurrently.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use inspection_attachd::{AssociatorSettings, AttachmentAssociator};
use inspection_common::{Config, InMemoryCloud, InspectionError};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Transit gateway attachment associator
#[derive(Parser, Debug)]
#[command(name = "attachd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Newline-delimited event file, `-` for stdin
    #[arg(short, long, default_value = "-")]
    events: String,

    /// Configuration file (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Cloud state file (JSON) read and written by the bundled backend
    #[arg(short = 's', long)]
    state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    info!("--- Starting attachd ---");

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("attachd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = Config::load_or_default(args.config.as_deref())?;
    let cloud = Arc::new(load_cloud(args.state.as_deref())?);
    let associator = Arc::new(AttachmentAssociator::new(
        Arc::clone(&cloud),
        AssociatorSettings::from_config(&config),
    ));

    let raw = read_input(&args.events)?;
    let mut tasks = JoinSet::new();
    let mut failed = 0usize;

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Value = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                let err = InspectionError::malformed("event", e.to_string());
                warn!(line = line_no + 1, error = %err, "Dropping unparseable event");
                failed += 1;
                continue;
            }
        };

        let associator = Arc::clone(&associator);
        tasks.spawn(async move { associator.handle_event(&event).await });
    }

    let mut handled = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => {
                handled += 1;
                println!(
                    "{} {} {}",
                    outcome.attachment_id, outcome.route_table_id, outcome.state
                );
            }
            Ok(Err(_)) => failed += 1,
            Err(e) => {
                error!(error = %e, "Event task panicked");
                failed += 1;
            }
        }
    }
    info!(handled, failed, "Finished processing events");

    if let Some(path) = args.state.as_deref() {
        cloud
            .save(path)
            .with_context(|| format!("Failed to save state to {}", path.display()))?;
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_cloud(state: Option<&Path>) -> Result<InMemoryCloud> {
    match state {
        Some(path) => InMemoryCloud::load(path)
            .with_context(|| format!("Failed to load state from {}", path.display())),
        None => Ok(InMemoryCloud::new()),
    }
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}
