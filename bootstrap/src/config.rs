use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use devnet_common::{
    config::{DEFAULT_TEST_TOKEN_SUPPLY, LAMPORTS_PER_SOL, NATIVE_DECIMALS},
    keys::KeyMaterial,
    rpc::{Commitment, LedgerClient, LedgerClientConfig},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::{
    error::BootstrapError,
    provision::{FundingPolicy, TokenSpec},
    readiness::{ReadinessCheck, ServiceEndpoint},
};

/// Default values for configuration
pub mod defaults {
    use super::*;

    pub const LEDGER_URL: &str = "http://solana:8899";
    pub const INTERVAL_MS: u64 = 1000;
    pub const COMMITMENT: Commitment = Commitment::Confirmed;

    // Ledger client defaults
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const MAX_RETRIES: u32 = 10;

    // Key material and the platform CLI inside the deploy image
    pub const PAYER_KEY_PATH: &str = "/root/.config/solana/id.json";
    pub const EVM_LOADER_KEY_PATH: &str = "/opt/evm_loader-keypair.json";
    pub const KEYS_DIR: &str = "/opt/keys";
    pub const PLATFORM_CLI: &str = "neon-cli";

    // Deploy commands wait this long for the environment before provisioning
    pub const DEPLOY_WAIT_ATTEMPTS: u32 = 60;

    // Payer funding
    pub const MIN_PAYER_BALANCE: u64 = 10 * LAMPORTS_PER_SOL;
    pub const AIRDROP_LAMPORTS: u64 = 1000 * LAMPORTS_PER_SOL;

    // Native token provisioned by deploy-evm
    pub const NATIVE_TOKEN_SYMBOL: &str = "NEON";
    pub const NATIVE_TOKEN_SUPPLY: u64 = 1_000_000 * LAMPORTS_PER_SOL;

    // Validation limits
    pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

    /// Multi-token test set provisioned by deploy-multi-tokens
    pub fn multi_tokens() -> Vec<TokenConfig> {
        vec![
            TokenConfig::new("USDC", 6, DEFAULT_TEST_TOKEN_SUPPLY),
            TokenConfig::new("USDT", 6, DEFAULT_TEST_TOKEN_SUPPLY),
            TokenConfig::new("WBTC", 8, DEFAULT_TEST_TOKEN_SUPPLY),
        ]
    }

    pub fn native_token() -> TokenConfig {
        TokenConfig::new(NATIVE_TOKEN_SYMBOL, NATIVE_DECIMALS, NATIVE_TOKEN_SUPPLY)
    }
}

/// Token entry of a configuration file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub decimals: u8,
    pub initial_supply: u64,
    /// Fixed mint keypair; the mint address is derived when absent
    #[serde(default)]
    pub mint_key_path: Option<PathBuf>,
    /// Mint authority keypair; the payer when absent
    #[serde(default)]
    pub authority_key_path: Option<PathBuf>,
}

impl TokenConfig {
    pub fn new<S: Into<String>>(symbol: S, decimals: u8, initial_supply: u64) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            initial_supply,
            mint_key_path: None,
            authority_key_path: None,
        }
    }
}

/// Configuration as read from a file, before validation.
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapFileConfig {
    /// Ledger RPC URL; required, the binaries fill it from `SOLANA_URL` or their default
    #[serde(default)]
    pub ledger_url: Option<String>,

    /// Loader program id; the address of `evm_loader_key_path` when absent
    #[serde(default)]
    pub evm_loader: Option<String>,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Overall bound on each readiness wait, on top of the attempt bound
    #[serde(default)]
    pub max_wait_secs: Option<u64>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_commitment")]
    pub commitment: Commitment,

    #[serde(default = "default_payer_key_path")]
    pub payer_key_path: PathBuf,

    #[serde(default = "default_evm_loader_key_path")]
    pub evm_loader_key_path: PathBuf,

    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,

    #[serde(default = "default_platform_cli")]
    pub platform_cli: PathBuf,

    #[serde(default = "default_min_payer_balance")]
    pub min_payer_balance: u64,

    #[serde(default = "default_airdrop_lamports")]
    pub airdrop_lamports: u64,

    /// Tokens to provision; each binary supplies its own set when empty
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

// Default functions for serde
fn default_interval_ms() -> u64 {
    defaults::INTERVAL_MS
}
fn default_request_timeout_secs() -> u64 {
    defaults::REQUEST_TIMEOUT_SECS
}
fn default_max_retries() -> u32 {
    defaults::MAX_RETRIES
}
fn default_commitment() -> Commitment {
    defaults::COMMITMENT
}
fn default_payer_key_path() -> PathBuf {
    PathBuf::from(defaults::PAYER_KEY_PATH)
}
fn default_evm_loader_key_path() -> PathBuf {
    PathBuf::from(defaults::EVM_LOADER_KEY_PATH)
}
fn default_keys_dir() -> PathBuf {
    PathBuf::from(defaults::KEYS_DIR)
}
fn default_platform_cli() -> PathBuf {
    PathBuf::from(defaults::PLATFORM_CLI)
}
fn default_min_payer_balance() -> u64 {
    defaults::MIN_PAYER_BALANCE
}
fn default_airdrop_lamports() -> u64 {
    defaults::AIRDROP_LAMPORTS
}

impl Default for BootstrapFileConfig {
    fn default() -> Self {
        Self {
            ledger_url: None,
            evm_loader: None,
            interval_ms: default_interval_ms(),
            max_wait_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            commitment: default_commitment(),
            payer_key_path: default_payer_key_path(),
            evm_loader_key_path: default_evm_loader_key_path(),
            keys_dir: default_keys_dir(),
            platform_cli: default_platform_cli(),
            min_payer_balance: default_min_payer_balance(),
            airdrop_lamports: default_airdrop_lamports(),
            tokens: Vec::new(),
        }
    }
}

impl BootstrapFileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BootstrapError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config = serde_json::from_str(&content).map_err(|e| {
            BootstrapError::configuration(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        info!("📄 Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check every value and resolve the ledger endpoint.
    ///
    /// Runs before any network activity so bad input never costs a polling cycle.
    pub fn validate(self) -> Result<BootstrapConfig, BootstrapError> {
        let url = self
            .ledger_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BootstrapError::configuration("SOLANA_URL is not set"))?;
        let ledger = ServiceEndpoint::parse(url)?;

        let evm_loader = match self.evm_loader.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(Pubkey::from_str(id).map_err(|e| {
                BootstrapError::configuration(format!("EVM_LOADER '{}' is invalid: {}", id, e))
            })?),
            _ => None,
        };

        if self.interval_ms == 0 {
            return Err(BootstrapError::configuration(
                "polling interval must be greater than zero",
            ));
        }
        if self.request_timeout_secs == 0
            || self.request_timeout_secs > defaults::MAX_REQUEST_TIMEOUT_SECS
        {
            return Err(BootstrapError::configuration(format!(
                "request timeout {}s is outside 1..={}s",
                self.request_timeout_secs,
                defaults::MAX_REQUEST_TIMEOUT_SECS
            )));
        }

        for token in &self.tokens {
            if token.symbol.trim().is_empty() {
                return Err(BootstrapError::configuration("token symbol must not be empty"));
            }
            if token.initial_supply == 0 {
                return Err(BootstrapError::configuration(format!(
                    "initial supply of {} must be greater than zero",
                    token.symbol
                )));
            }
        }
        let mut symbols: Vec<String> =
            self.tokens.iter().map(|t| t.symbol.to_lowercase()).collect();
        symbols.sort();
        if let Some(pair) = symbols.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(BootstrapError::configuration(format!(
                "token {} is listed more than once",
                pair[0]
            )));
        }

        debug!("Configuration validated for ledger {}", ledger);

        Ok(BootstrapConfig {
            ledger,
            evm_loader,
            interval: Duration::from_millis(self.interval_ms),
            max_wait: self.max_wait_secs.map(Duration::from_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            commitment: self.commitment,
            payer_key_path: self.payer_key_path,
            evm_loader_key_path: self.evm_loader_key_path,
            keys_dir: self.keys_dir,
            platform_cli: self.platform_cli,
            funding: FundingPolicy {
                min_balance: self.min_payer_balance,
                airdrop_lamports: self.airdrop_lamports,
            },
            tokens: self.tokens,
        })
    }
}

/// Validated configuration of a bootstrap run
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub ledger: ServiceEndpoint,
    evm_loader: Option<Pubkey>,
    pub interval: Duration,
    pub max_wait: Option<Duration>,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub commitment: Commitment,
    pub payer_key_path: PathBuf,
    pub evm_loader_key_path: PathBuf,
    pub keys_dir: PathBuf,
    pub platform_cli: PathBuf,
    pub funding: FundingPolicy,
    pub tokens: Vec<TokenConfig>,
}

impl BootstrapConfig {
    /// Readiness policy against the ledger endpoint; `max_attempts` of `None`
    /// with no `max_wait` means a single attempt.
    pub fn readiness_check(&self, max_attempts: Option<u32>) -> ReadinessCheck {
        let mut check = ReadinessCheck::once(self.ledger.clone(), self.interval);
        if let Some(max_attempts) = max_attempts {
            check = check.with_max_attempts(max_attempts);
        }
        if let Some(max_wait) = self.max_wait {
            check = check.with_max_duration(max_wait);
        }
        check
    }

    /// Client settings for readiness polling: one request per attempt, bounded
    /// by the polling interval so a silent endpoint costs one interval per attempt
    pub fn probe_client_config(&self) -> LedgerClientConfig {
        LedgerClientConfig {
            commitment: self.commitment,
            ..LedgerClientConfig::single_shot(self.request_timeout.min(self.interval))
        }
    }

    /// Client for readiness polling; the readiness probe owns retries
    pub fn probe_client(&self) -> Result<LedgerClient, BootstrapError> {
        LedgerClient::with_config(self.ledger.as_str(), self.probe_client_config())
            .map_err(|e| BootstrapError::from_rpc(self.ledger.as_str(), e))
    }

    /// Client for provisioning, retrying transport failures
    pub fn ledger_client(&self) -> Result<LedgerClient, BootstrapError> {
        let config = LedgerClientConfig {
            request_timeout: self.request_timeout,
            max_retries: self.max_retries,
            commitment: self.commitment,
            ..LedgerClientConfig::default()
        };
        LedgerClient::with_config(self.ledger.as_str(), config)
            .map_err(|e| BootstrapError::from_rpc(self.ledger.as_str(), e))
    }

    /// Loader program id, falling back to the address of the loader key file
    pub fn evm_loader(&self) -> Result<Pubkey, BootstrapError> {
        match self.evm_loader {
            Some(id) => Ok(id),
            None => {
                let key = KeyMaterial::load(&self.evm_loader_key_path).map_err(|e| {
                    BootstrapError::configuration(format!("EVM_LOADER is not set and {}", e))
                })?;
                Ok(key.address())
            }
        }
    }

    pub fn load_payer(&self) -> Result<Arc<KeyMaterial>, BootstrapError> {
        Ok(Arc::new(KeyMaterial::load(&self.payer_key_path)?))
    }

    /// Resolve token entries into specs, loading every key file they name.
    ///
    /// `fallback` is used when the configuration lists no tokens.
    pub fn token_specs(
        &self,
        payer: &Arc<KeyMaterial>,
        fallback: Vec<TokenConfig>,
    ) -> Result<Vec<TokenSpec>, BootstrapError> {
        let tokens = if self.tokens.is_empty() {
            fallback
        } else {
            self.tokens.clone()
        };

        tokens
            .into_iter()
            .map(|token| {
                let authority = match &token.authority_key_path {
                    Some(path) => Arc::new(KeyMaterial::load(path)?),
                    None => payer.clone(),
                };
                let mut spec =
                    TokenSpec::new(token.symbol, token.decimals, token.initial_supply, authority);
                if let Some(path) = &token.mint_key_path {
                    spec = spec.with_mint_key(Arc::new(KeyMaterial::load(path)?));
                }
                spec.validate()?;
                Ok(spec)
            })
            .collect()
    }
}
