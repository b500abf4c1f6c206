//! mindmux binary entrypoint

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mindmux::api;
use mindmux::config::MindmuxConfig;
use mindmux::orchestrator::Orchestrator;
use mindmux::tmux::{Multiplexer, TmuxDriver};

#[derive(Parser)]
#[command(name = "mindmux", version, about = "Orchestrate fleets of AI CLI assistants in tmux panes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and the HTTP monitoring surface
    Serve {
        /// HTTP bind address
        #[arg(long, default_value = "127.0.0.1:8700")]
        bind: String,

        /// State directory (defaults to ~/.mindmux)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Scheduler tick interval in milliseconds
        #[arg(long, default_value_t = 200)]
        tick_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            bind,
            data_dir,
            tick_ms,
        } => serve(bind, data_dir, tick_ms).await,
    }
}

async fn serve(bind: String, data_dir: Option<PathBuf>, tick_ms: u64) -> Result<()> {
    let mut config = MindmuxConfig {
        bind_addr: bind,
        tick_interval_ms: tick_ms,
        ..Default::default()
    };
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }

    let driver: Arc<dyn Multiplexer> =
        Arc::new(TmuxDriver::new().context("tmux is required to run mindmux")?);

    let orchestrator = Arc::new(Orchestrator::new(config, driver)?);
    orchestrator.start().await?;

    let server = tokio::spawn(api::serve(Arc::clone(&orchestrator)));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    orchestrator.shutdown();
    server.abort();
    Ok(())
}
