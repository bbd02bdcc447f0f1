//! routemgrd - inspection route manager
//!
//! Handles provisioning lifecycle requests for inspection routes and
//! reconciles the whole inspection routing table set on demand.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inspection_common::{retry_with_backoff, Config, FirewallApi, InMemoryCloud, InspectionError};
use inspection_routemgrd::{
    plan_inspection_routes, HttpResponseSink, InspectionIntent, LifecycleAdapter,
    LifecycleRequest, LifecycleSettings, ResponseSink, RouteReconciler, StdoutSink,
    TopologyIndex,
};
use inspection_types::{Cidr, Subnet};
use serde::Deserialize;
use tracing::{error, info};

/// Inspection route manager
#[derive(Parser, Debug)]
#[command(name = "routemgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Cloud state file (JSON) read and written by the bundled backend
    #[arg(short = 's', long, global = true)]
    state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Handle one provisioning lifecycle request
    Handle {
        /// Request file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: String,

        /// PUT the response to the request's ResponseURL instead of stdout
        #[arg(long)]
        respond: bool,
    },

    /// Plan and apply every inspection route for a topology
    Reconcile {
        /// Topology file (JSON, `{"subnets": [...]}`)
        #[arg(long)]
        topology: PathBuf,

        /// Organisation CIDR routed back through the firewall
        #[arg(long)]
        org_cidr: Cidr,

        /// Transit gateway id
        #[arg(long)]
        transit_gateway: String,

        /// Firewall whose endpoints serve the TGW and public subnets
        #[arg(long)]
        firewall_arn: String,
    },
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    subnets: Vec<Subnet>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    info!("--- Starting routemgrd ---");

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("routemgrd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = Config::load_or_default(args.config.as_deref())?;
    let cloud = Arc::new(load_cloud(args.state.as_deref())?);

    let code = match args.command {
        Command::Handle { request, respond } => {
            let raw = read_input(&request)?;
            let request: LifecycleRequest =
                serde_json::from_str(&raw).context("Failed to parse lifecycle request")?;

            let adapter = LifecycleAdapter::new(Arc::clone(&cloud), LifecycleSettings::from_config(&config));
            let response = adapter.handle(&request).await;

            let sink: Box<dyn ResponseSink> = if respond {
                Box::new(HttpResponseSink::new())
            } else {
                Box::new(StdoutSink)
            };
            sink.deliver(&request, &response)
                .await
                .context("Failed to deliver lifecycle response")?;

            if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Reconcile {
            topology,
            org_cidr,
            transit_gateway,
            firewall_arn,
        } => {
            let raw = read_input(&topology.to_string_lossy())?;
            let topology: TopologyFile =
                serde_json::from_str(&raw).context("Failed to parse topology file")?;
            let policy = config.retry_policy();

            let endpoints = retry_with_backoff(&policy, "DescribeFirewall", || async {
                cloud
                    .describe_endpoints(&firewall_arn)
                    .await
                    .map_err(InspectionError::from)
            })
            .await?;

            let index = TopologyIndex::build(&topology.subnets, &endpoints)?;
            let intent = InspectionIntent {
                org_cidr,
                transit_gateway_id: transit_gateway,
            };
            let plan = plan_inspection_routes(&topology.subnets, &index, &intent)?;
            info!(routes = plan.len(), zones = index.len(), "Planned inspection routes");

            let report = RouteReconciler::new(Arc::clone(&cloud), policy)
                .apply(&plan)
                .await?;
            println!("{}", report);
            ExitCode::SUCCESS
        }
    };

    if let Some(path) = args.state.as_deref() {
        cloud
            .save(path)
            .with_context(|| format!("Failed to save state to {}", path.display()))?;
    }

    Ok(code)
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
