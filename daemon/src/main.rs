//! trellis daemon binary
//!
//! Builds the dependent service, then supervises the foundational and
//! dependent services until SIGINT or SIGTERM.

#![allow(unused_crate_dependencies)]

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use trellis_core::config::load_stack_from_toml_path;
use trellis_core::install_signal_handlers;
use trellis_core::utils::init_tracing;
use trellisd::{DaemonError, Orchestrator, Result};

#[derive(Parser)]
#[command(name = "trellisd")]
#[command(about = "Supervise a foundational service and the service built on top of it")]
#[command(version)]
struct Args {
    /// Stack configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Reuse the existing build artifact instead of building
    #[arg(long)]
    skip_build: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("trellisd: {e}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => {
            info!("trellisd exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.is_startup_fatal() {
                error!(code = e.code(), "trellisd could not start: {}", e);
            } else {
                error!(code = e.code(), "trellisd failed: {}", e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_stack_from_toml_path(&args.config)?;
    info!("Loaded stack configuration from {}", args.config.display());

    let mut orchestrator = Orchestrator::new(config).skip_build(args.skip_build);
    let signals = install_signal_handlers(orchestrator.shutdown_signal())
        .map_err(|e| DaemonError::Startup(format!("could not install signal handlers: {e}")))?;

    let result = orchestrator.run().await;
    signals.abort();

    let report = result?;
    info!(
        stopped = report.signalled(),
        services = report.outcomes.len(),
        "Stack stopped"
    );
    Ok(())
}
