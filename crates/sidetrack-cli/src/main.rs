//! sidetrack - track side-projects through their GitHub commits.
//!
//! Command-line front end for the sidetrack API: log in, manage projects and
//! view commit activity. The session is persisted between runs and an
//! expired access token is refreshed transparently.

mod app;
mod commands;
mod render;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use commands::Commands;

/// Name of the rolling log file inside `--log-dir`.
const LOG_FILE_PREFIX: &str = "sidetrack.log";

#[derive(Parser)]
#[command(name = "sidetrack")]
#[command(about = "Track side-projects through their GitHub commits")]
#[command(version)]
struct Cli {
    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true, env = "SIDETRACK_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Keep the session in memory only for this run
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=sidetrack_core=debug).
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let guard = init_tracing(cli.log_dir);
    info!("sidetrack starting");

    let mut app = App::new(cli.ephemeral)?;
    if let Err(e) = app.run(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        // exit() skips destructors; flush the log writer first
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}
