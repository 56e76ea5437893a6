//! crawld: concurrent URL crawling daemon
//!
//! Serves `POST /crawl`: fetch a batch of URLs in parallel and answer with
//! per-URL status codes in submission order.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crawld::config::LogFormat;
use crawld::{Config, CrawlServer};

#[derive(Parser)]
#[command(name = "crawld")]
#[command(about = "Concurrent URL crawling daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override (e.g., "127.0.0.1:8080")
    #[arg(short, long)]
    listen: Option<String>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config, cli.verbose);

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let server = CrawlServer::new(config)?;
    server.run(shutdown).await
}

fn init_tracing(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Cancel the shutdown token on Ctrl+C or SIGTERM.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
            }
            _ = wait_for_sigterm() => {
                info!("received SIGTERM, shutting down");
            }
        }
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
