use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use devnet_bootstrap::{
    cli::{self, CommonArgs},
    clock::{Clock, SystemClock},
    error::{Stage, StageFailure},
};
use log::info;

/// Wait until the ledger node accepts requests
#[derive(Parser, Debug)]
#[command(name = "wait-for-ledger", version)]
struct Cli {
    /// Attempts one interval apart; a single attempt when omitted
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
    let (config, _) = cli
        .common
        .resolve(None)
        .map_err(|e| cli::configuration_failure(&cli.common, e))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut gate = cli::ledger_gate(&config, clock, cli.timeout_seconds)
        .map_err(|e| StageFailure::new(Stage::Configuration, config.ledger.to_string(), e))?;

    let ready = gate
        .wait()
        .await
        .map_err(|e| StageFailure::new(Stage::Ledger, config.ledger.to_string(), e))?;

    info!(
        "✅ Ledger {} ready after {} attempt(s)",
        ready.endpoint(),
        ready.outcome().attempts
    );
    Ok(())
}
