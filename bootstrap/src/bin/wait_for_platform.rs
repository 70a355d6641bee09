use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use devnet_bootstrap::{
    cli::{self, CommonArgs},
    clock::{Clock, SystemClock},
    error::{Stage, StageFailure},
    orchestrator::BootstrapOrchestrator,
};
use log::info;

/// Wait for the ledger, then initialize the platform environment against it
#[derive(Parser, Debug)]
#[command(name = "wait-for-platform", version)]
struct Cli {
    /// Attempts one interval apart for each wait; a single attempt when omitted
    timeout_seconds: Option<u32>,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_logging_or_warn(&cli.common);
    cli::exit_code(run(cli).await)
}

async fn run(cli: Cli) -> Result<()> {
    let (config, topology) = cli
        .common
        .resolve(None)
        .map_err(|e| cli::configuration_failure(&cli.common, e))?;
    let configuration_error =
        |e| StageFailure::new(Stage::Configuration, config.ledger.to_string(), e);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let initializer = Arc::new(cli::cli_initializer(&config).map_err(configuration_error)?);
    let ledger_gate = cli::ledger_gate(&config, clock.clone(), cli.timeout_seconds)
        .map_err(configuration_error)?;
    let platform_gate =
        cli::platform_gate(&config, clock.clone(), initializer, cli.timeout_seconds);

    let mut orchestrator =
        BootstrapOrchestrator::new(clock, ledger_gate).with_platform(platform_gate);
    if let Some(topology) = topology {
        orchestrator = orchestrator.with_topology(topology);
    }

    let report = orchestrator.run().await?;
    info!("✅ Platform ready in {:?}", report.elapsed);
    Ok(())
}
