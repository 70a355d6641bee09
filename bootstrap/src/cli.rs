use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Args;
use devnet_common::{
    config::VERSION,
    logger::{setup_logger, LogLevel, LoggerError},
    rpc::Commitment,
};
use log::info;

use crate::{
    clock::{Clock, SystemClock},
    config::{BootstrapConfig, BootstrapFileConfig, TokenConfig},
    error::{BootstrapError, Stage, StageFailure},
    orchestrator::{BootstrapOrchestrator, BootstrapReport},
    provision::{AccountProvisioner, TokenLedger},
    readiness::{
        CliPlatformInitializer, LedgerReadinessGate, LoaderProgramCheck, PlatformInitializer,
        PlatformReadinessGate, ReadinessProbe,
    },
    topology::Topology,
};

/// Flags shared by every bootstrap binary
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Set log level
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Disable the usage of colors in log
    #[clap(long)]
    pub disable_log_color: bool,

    /// JSON file to load the configuration from
    #[clap(long)]
    pub config_file: Option<PathBuf>,

    /// Service graph (YAML or JSON) naming the ledger and the services to release
    #[clap(long)]
    pub topology: Option<PathBuf>,

    /// Ledger RPC URL
    #[clap(long, env = "SOLANA_URL")]
    pub url: Option<String>,

    /// Loader program id; defaults to the address of the loader key file
    #[clap(long, env = "EVM_LOADER")]
    pub evm_loader: Option<String>,

    /// Delay between readiness attempts in milliseconds
    #[clap(long)]
    pub interval_ms: Option<u64>,

    /// Timeout of a single ledger request in seconds
    #[clap(long, env = "SOLANA_TIMEOUT")]
    pub request_timeout_secs: Option<u64>,

    /// Retries of a failed ledger request while provisioning
    #[clap(long, env = "SOLANA_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Commitment level reads and confirmations wait for
    #[clap(long, env = "COMMITMENT")]
    pub commitment: Option<Commitment>,

    /// Fee payer key file
    #[clap(long)]
    pub payer_key: Option<PathBuf>,
}

impl CommonArgs {
    pub fn init_logging(&self) -> Result<(), LoggerError> {
        setup_logger(self.log_level, self.disable_log_color)
    }

    /// File configuration with every flag that was given applied on top
    pub fn file_config(&self) -> Result<BootstrapFileConfig, BootstrapError> {
        let mut config = match &self.config_file {
            Some(path) => BootstrapFileConfig::from_file(path)?,
            None => BootstrapFileConfig::default(),
        };

        if let Some(url) = &self.url {
            config.ledger_url = Some(url.clone());
        }
        if let Some(evm_loader) = &self.evm_loader {
            config.evm_loader = Some(evm_loader.clone());
        }
        if let Some(interval_ms) = self.interval_ms {
            config.interval_ms = interval_ms;
        }
        if let Some(timeout) = self.request_timeout_secs {
            config.request_timeout_secs = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(commitment) = self.commitment {
            config.commitment = commitment;
        }
        if let Some(path) = &self.payer_key {
            config.payer_key_path = path.clone();
        }
        Ok(config)
    }

    pub fn load_topology(&self) -> Result<Option<Topology>, BootstrapError> {
        self.topology.as_ref().map(Topology::load).transpose()
    }

    /// Validate everything before the first request.
    ///
    /// The ledger URL comes from the flags or environment, then the configuration
    /// file, then the topology's ledger service, then `default_ledger`.
    pub fn resolve(
        &self,
        default_ledger: Option<&str>,
    ) -> Result<(BootstrapConfig, Option<Topology>), BootstrapError> {
        let topology = self.load_topology()?;
        let mut file = self.file_config()?;

        if file.ledger_url.is_none() {
            file.ledger_url = match &topology {
                Some(topology) => topology.ledger_endpoint()?.map(|e| e.to_string()),
                None => None,
            }
            .or_else(|| default_ledger.map(String::from));
        }

        Ok((file.validate()?, topology))
    }
}

pub fn ledger_gate(
    config: &BootstrapConfig,
    clock: Arc<dyn Clock>,
    max_attempts: Option<u32>,
) -> Result<LedgerReadinessGate, BootstrapError> {
    let client = config.probe_client()?;
    Ok(LedgerReadinessGate::new(
        ReadinessProbe::new(clock),
        Arc::new(client),
        config.readiness_check(max_attempts),
    ))
}

pub fn platform_gate(
    config: &BootstrapConfig,
    clock: Arc<dyn Clock>,
    initializer: Arc<dyn PlatformInitializer>,
    max_attempts: Option<u32>,
) -> PlatformReadinessGate {
    PlatformReadinessGate::new(
        ReadinessProbe::new(clock),
        initializer,
        config.readiness_check(max_attempts),
    )
}

/// Initializer running the platform CLI's `init-environment`
pub fn cli_initializer(
    config: &BootstrapConfig,
) -> Result<CliPlatformInitializer, BootstrapError> {
    Ok(CliPlatformInitializer::new(
        config.platform_cli.clone(),
        config.evm_loader()?,
        config.payer_key_path.clone(),
        config.keys_dir.clone(),
    ))
}

/// Wait for the environment, then provision `fallback_tokens` unless the
/// configuration lists its own.
///
/// The platform counts as ready once the loader program is deployed; with
/// `run_platform_cli` the platform CLI initializes the environment first.
pub async fn deploy(
    common: &CommonArgs,
    run_platform_cli: bool,
    wait_attempts: u32,
    fallback_tokens: Vec<TokenConfig>,
) -> anyhow::Result<BootstrapReport> {
    let (config, topology) = common
        .resolve(Some(crate::config::defaults::LEDGER_URL))
        .map_err(|e| configuration_failure(common, e))?;
    info!("Devnet bootstrap v{} against {}", VERSION, config.ledger);

    let mut orchestrator =
        prepare_deploy(&config, run_platform_cli, wait_attempts, fallback_tokens)
            .map_err(|e| StageFailure::new(Stage::Configuration, config.ledger.to_string(), e))?;
    if let Some(topology) = topology {
        orchestrator = orchestrator.with_topology(topology);
    }

    let report = orchestrator.run().await?;
    for provisioned in &report.provisioned {
        let account = &provisioned.account;
        println!(
            "🪙 {} mint {} holding {} supply {} ({} decimals, {:?})",
            account.symbol,
            account.mint_address,
            account.holding_account_address,
            account.minted_supply,
            account.decimals,
            provisioned.action
        );
    }
    if !report.released_services.is_empty() {
        println!("🚀 Ready for {}", report.released_services.join(", "));
    }
    Ok(report)
}

fn prepare_deploy(
    config: &BootstrapConfig,
    run_platform_cli: bool,
    wait_attempts: u32,
    fallback_tokens: Vec<TokenConfig>,
) -> Result<BootstrapOrchestrator, BootstrapError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let payer = config.load_payer()?;
    let specs = config.token_specs(&payer, fallback_tokens)?;
    let ledger: Arc<dyn TokenLedger> = Arc::new(config.ledger_client()?);

    let initializer: Arc<dyn PlatformInitializer> = if run_platform_cli {
        Arc::new(cli_initializer(config)?)
    } else {
        Arc::new(LoaderProgramCheck::new(ledger.clone(), config.evm_loader()?))
    };

    let provisioner = AccountProvisioner::new(ledger, payer).with_funding(config.funding);
    let wait_attempts = Some(wait_attempts);

    Ok(BootstrapOrchestrator::new(
        clock.clone(),
        ledger_gate(config, clock.clone(), wait_attempts)?,
    )
    .with_platform(platform_gate(config, clock, initializer, wait_attempts))
    .with_provisioning(provisioner, specs))
}

/// Failure raised before any stage ran, tagged with whatever endpoint was given
pub fn configuration_failure(common: &CommonArgs, error: BootstrapError) -> StageFailure {
    let endpoint = common.url.clone().unwrap_or_else(|| "<unset>".to_string());
    StageFailure::new(Stage::Configuration, endpoint, error)
}

/// Map a run result to the process exit code, printing the diagnostic on failure
pub fn exit_code<T>(result: anyhow::Result<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Set up logging; a process without a logger still reports through its exit code
pub fn init_logging_or_warn(common: &CommonArgs) {
    if let Err(e) = common.init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }
}
