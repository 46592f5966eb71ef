//! base-counter - live base counts for sequencing runs
//!
//! Subscribes to each run's status event stream and draws one terminal row
//! per run. Between server pushes the count is extrapolated from the
//! reported rate, so the numbers tick up smoothly.
//!
//! ## Modes
//!
//! **Default** (no subcommand): watch the given runs (or the configured ones)
//! until Ctrl+C. When stdout is not a terminal no rows are reserved and
//! the counters are drawn from row 0.
//!
//! **Listing** (`base-counter runs`): print the server's run listing as JSON.

use base_counter::{
    client::{ClientError, StatusClient},
    clock::{Clock, SystemClock},
    config::{ConfigError, CounterConfig},
    registry::Registry,
    render::RenderLoop,
    session::CounterSession,
    terminal::{self, CursorGuard, TerminalDisplay},
};
use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often `--exit-when-done` checks for remaining sessions.
const DRAIN_POLL: Duration = Duration::from_millis(250);

/// base-counter - live base counts for sequencing runs
#[derive(ClapParser, Debug)]
#[command(name = "base-counter", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run ids to watch (defaults to the configured runs)
    runs: Vec<String>,

    /// Base URL of the status server
    #[arg(long, env = "BASE_COUNTER_SERVER")]
    server: Option<String>,

    /// Path to the config file
    #[arg(long, env = "BASE_COUNTER_CONFIG")]
    config: Option<PathBuf>,

    /// Render loop period in milliseconds
    #[arg(long)]
    frame_ms: Option<u64>,

    /// Reconnection delay in milliseconds until the server advertises one
    #[arg(long)]
    retry_ms: Option<u64>,

    /// Exit once every watched run has finished
    #[arg(long)]
    exit_when_done: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the server's run listing
    Runs {
        /// Base URL of the status server
        #[arg(long, env = "BASE_COUNTER_SERVER")]
        server: Option<String>,

        /// Path to the config file
        #[arg(long, env = "BASE_COUNTER_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Error, Debug)]
pub enum CounterError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("status client error: {0}")]
    Client(#[from] ClientError),

    #[error("terminal error: {0}")]
    Terminal(#[from] terminal::TerminalError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> Result<(), CounterError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Runs { server, config }) => {
            init_tracing("base_counter=info");
            run_list(server, config).await
        }
        None => {
            // The counters own stdout; keep stderr quiet unless asked.
            init_tracing("base_counter=warn");
            run_watch(cli).await
        }
    }
}

/// Initialize tracing with stderr output, since stdout carries the display.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Listing ────────────────────────────────────────────────────────

async fn run_list(server: Option<String>, config: Option<PathBuf>) -> Result<(), CounterError> {
    let mut config = CounterConfig::load_or_default(config.as_deref())?;
    if server.is_some() {
        config.server = server;
    }

    let client = StatusClient::new(config.server())?;
    let listing = client.list_runs().await?;
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

// ── Watch mode ─────────────────────────────────────────────────────

async fn run_watch(cli: Cli) -> Result<(), CounterError> {
    let mut config = CounterConfig::load_or_default(cli.config.as_deref())?;
    if cli.server.is_some() {
        config.server = cli.server;
    }
    if !cli.runs.is_empty() {
        config.runs = cli.runs;
    }
    if cli.frame_ms.is_some() {
        config.frame_interval_ms = cli.frame_ms;
    }
    if cli.retry_ms.is_some() {
        config.retry_ms = cli.retry_ms;
    }

    let runs = config.runs();
    tracing::info!(server = %config.server(), runs = runs.len(), "base-counter starting");

    let client = StatusClient::new(config.server())?.with_retry(config.retry());

    // The listing is fetched for information only; nothing reads it yet.
    let listing_client = client.clone();
    tokio::spawn(async move {
        match listing_client.list_runs().await {
            Ok(listing) => tracing::debug!(%listing, "run listing fetched"),
            Err(e) => tracing::debug!(error = %e, "run listing unavailable"),
        }
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Registry::new();

    let _cursor = CursorGuard::new()?;
    let rows = u16::try_from(runs.len()).unwrap_or(u16::MAX);
    let top = terminal::reserve_rows(rows)?;
    let writer = terminal::stdout_writer();

    let mut subscriptions = Vec::with_capacity(runs.len());
    for (row, run_id) in (top..).zip(runs.iter()) {
        let display = TerminalDisplay::new(row, run_id.clone(), writer.clone());
        let session = CounterSession::new(run_id.clone(), Box::new(display), clock.clone());
        registry.register(session.clone());
        subscriptions.push(client.spawn_subscription(session));
    }

    let cancel = CancellationToken::new();
    let render = RenderLoop::new(registry.clone(), clock, config.frame_interval())
        .spawn(cancel.clone());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
        }
        _ = wait_until_drained(&registry), if cli.exit_when_done => {
            tracing::info!("all runs finished");
        }
    }

    cancel.cancel();
    let frames = render.await?;

    for subscription in subscriptions {
        subscription.abort();
    }

    tracing::info!(frames, "base-counter exiting");
    Ok(())
}

/// Resolves once the render loop has pruned every session.
async fn wait_until_drained(registry: &Registry) {
    let mut poll = tokio::time::interval(DRAIN_POLL);
    loop {
        poll.tick().await;
        if registry.is_empty() {
            return;
        }
    }
}
