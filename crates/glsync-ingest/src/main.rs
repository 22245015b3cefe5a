//! glsync - GitLab extraction tool

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use glsync_common::logging::{init_logging, LogConfig, LogLevel};
use glsync_ingest::catalog::{discover, Catalog};
use glsync_ingest::client::GitLabClient;
use glsync_ingest::config::TapConfig;
use glsync_ingest::context::SyncContext;
use glsync_ingest::sink::JsonLinesSink;
use glsync_ingest::state::State;
use glsync_ingest::Orchestrator;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "glsync")]
#[command(author, version, about = "Incremental GitLab extraction")]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, env = "GLSYNC_CONFIG")]
    config: PathBuf,

    /// State file from a previous run
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Catalog file selecting streams and fields
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print the catalog of available streams and exit
    #[arg(short, long)]
    discover: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder().level(log_level).build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "glsync failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = TapConfig::load(&cli.config).context("Failed to load config")?;

    if cli.discover {
        let catalog = discover();
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path).context("Failed to load catalog")?,
        None => discover(),
    };
    let state = match &cli.state {
        Some(path) => State::load(path).context("Failed to load state")?,
        None => State::default(),
    };

    let client = GitLabClient::new(config.client_config())?;
    let ctx = SyncContext::new(client, config, catalog, state, JsonLinesSink::stdout())?;
    let summary = Orchestrator::new(ctx).run().await?;

    for stream in &summary.streams {
        info!(stream = %stream.stream_id, records = stream.records, "Stream summary");
    }
    Ok(())
}
