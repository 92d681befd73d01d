#![forbid(unsafe_code)]

mod cli;
mod clipboard;
mod config;
mod constants;
mod daemon;
mod history;
mod hotkeys;
mod ipc;
mod types;
mod window;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level as TraceLevel;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Command, DaemonArgs};

fn log_level(value: Option<String>) -> TraceLevel {
    match value.unwrap_or_else(|| "info".to_string()).to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn main() -> Result<()> {
    // Logs go to stderr so client output on stdout stays scriptable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(std::env::var(constants::env::LOG_LEVEL).ok()))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")?;

    let cli = Cli::parse();
    match cli.command {
        None => daemon::run(DaemonArgs::default()),
        Some(Command::Daemon(args)) => daemon::run(args),
        Some(command) => cli::run_client(command),
    }
}
