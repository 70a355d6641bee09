use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use devnet_bootstrap::{
    cli::{self, CommonArgs},
    config::defaults,
};

/// Provision the USDC, USDT and WBTC test mints once the environment is up
#[derive(Parser, Debug)]
#[command(name = "deploy-multi-tokens", version)]
struct Cli {
    /// Initialize the platform with its CLI instead of only checking the loader program
    #[clap(long)]
    platform_cli: bool,

    /// Attempts for each readiness wait
    #[clap(long, default_value_t = defaults::DEPLOY_WAIT_ATTEMPTS)]
    wait_attempts: u32,

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
    let report = cli::deploy(
        &cli.common,
        cli.platform_cli,
        cli.wait_attempts,
        defaults::multi_tokens(),
    )
    .await?;
    println!("✅ {} test token(s) deployed", report.provisioned.len());
    Ok(())
}
