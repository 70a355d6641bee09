use std::{io::ErrorKind, path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use log::{debug, info, log_enabled, Level};
use tokio::process::Command;

use super::{
    LedgerReady, ProbeOutcome, ReadinessCheck, ReadinessPredicate, ReadinessProbe, ReadinessState,
    ServiceEndpoint,
};
use crate::{error::BootstrapError, provision::TokenLedger};

// Lines of stderr kept in an initialization error
const STDERR_TAIL_LINES: usize = 10;

/// One-time environment initialization of the execution-compatibility layer.
///
/// Each call is an independent attempt; `Ok` means the environment is initialized.
#[async_trait]
pub trait PlatformInitializer: Send + Sync {
    async fn initialize(&self, ledger: &ServiceEndpoint) -> Result<(), BootstrapError>;
}

/// Runs the platform CLI's `init-environment` command
#[derive(Debug, Clone)]
pub struct CliPlatformInitializer {
    program: PathBuf,
    evm_loader: Pubkey,
    payer_key_path: PathBuf,
    keys_dir: PathBuf,
}

impl CliPlatformInitializer {
    pub fn new(
        program: PathBuf,
        evm_loader: Pubkey,
        payer_key_path: PathBuf,
        keys_dir: PathBuf,
    ) -> Self {
        Self {
            program,
            evm_loader,
            payer_key_path,
            keys_dir,
        }
    }

    pub fn args(&self, ledger: &ServiceEndpoint) -> Vec<String> {
        vec![
            "--url".to_string(),
            ledger.to_string(),
            "--evm_loader".to_string(),
            self.evm_loader.to_string(),
            "--keypair".to_string(),
            self.payer_key_path.display().to_string(),
            "init-environment".to_string(),
            "--send-trx".to_string(),
            "--keys-dir".to_string(),
            self.keys_dir.display().to_string(),
        ]
    }
}

#[async_trait]
impl PlatformInitializer for CliPlatformInitializer {
    async fn initialize(&self, ledger: &ServiceEndpoint) -> Result<(), BootstrapError> {
        let args = self.args(ledger);
        if log_enabled!(Level::Debug) {
            debug!("Running {} {}", self.program.display(), args.join(" "));
        }

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => BootstrapError::configuration(
                    format!("cannot run platform CLI '{}': {}", self.program.display(), e),
                ),
                _ => BootstrapError::Initialization {
                    reason: format!("failed to run '{}': {}", self.program.display(), e),
                },
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(BootstrapError::Initialization {
            reason: format!(
                "'{}' exited with {}: {}",
                self.program.display(),
                output.status,
                stderr_tail(&stderr)
            ),
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Treats the platform as initialized once its loader program is deployed and executable
pub struct LoaderProgramCheck {
    ledger: Arc<dyn TokenLedger>,
    evm_loader: Pubkey,
}

impl LoaderProgramCheck {
    pub fn new(ledger: Arc<dyn TokenLedger>, evm_loader: Pubkey) -> Self {
        Self { ledger, evm_loader }
    }
}

#[async_trait]
impl PlatformInitializer for LoaderProgramCheck {
    async fn initialize(&self, ledger: &ServiceEndpoint) -> Result<(), BootstrapError> {
        let account = self
            .ledger
            .account(&self.evm_loader)
            .await
            .map_err(|e| BootstrapError::from_rpc(ledger.as_str(), e))?;

        match account {
            Some(account) if account.executable => Ok(()),
            Some(_) => Err(BootstrapError::Initialization {
                reason: format!("loader {} exists but is not executable", self.evm_loader),
            }),
            None => Err(BootstrapError::Initialization {
                reason: format!("loader {} is not deployed", self.evm_loader),
            }),
        }
    }
}

/// Proof that the platform finished initializing against a ready ledger.
///
/// Only [`PlatformReadinessGate::wait`] creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformReady {
    ledger: LedgerReady,
    outcome: ProbeOutcome,
}

impl PlatformReady {
    pub fn ledger(&self) -> &LedgerReady {
        &self.ledger
    }

    pub fn outcome(&self) -> ProbeOutcome {
        self.outcome
    }
}

struct InitializePredicate<'a> {
    initializer: &'a dyn PlatformInitializer,
}

#[async_trait]
impl ReadinessPredicate for InitializePredicate<'_> {
    async fn evaluate(&self, target: &ServiceEndpoint) -> Result<(), BootstrapError> {
        self.initializer.initialize(target).await
    }
}

pub struct PlatformReadinessGate {
    probe: ReadinessProbe,
    initializer: Arc<dyn PlatformInitializer>,
    check: ReadinessCheck,
    state: ReadinessState,
    result: Option<Result<PlatformReady, BootstrapError>>,
}

impl PlatformReadinessGate {
    /// `check.target` is the ledger the platform initializes against
    pub fn new(
        probe: ReadinessProbe,
        initializer: Arc<dyn PlatformInitializer>,
        check: ReadinessCheck,
    ) -> Self {
        Self {
            probe,
            initializer,
            check,
            state: ReadinessState::Unknown,
            result: None,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn check(&self) -> &ReadinessCheck {
        &self.check
    }

    pub async fn wait(&mut self, ledger: &LedgerReady) -> Result<PlatformReady, BootstrapError> {
        if let Some(result) = &self.result {
            return result.clone();
        }

        if ledger.endpoint() != &self.check.target {
            return Err(BootstrapError::configuration(format!(
                "platform initializes against {} but the ready ledger is {}",
                self.check.target,
                ledger.endpoint()
            )));
        }

        info!("Initializing platform environment against {}", self.check.target);
        self.state = ReadinessState::Polling;

        let predicate = InitializePredicate {
            initializer: self.initializer.as_ref(),
        };
        let result = self
            .probe
            .poll(&self.check, &predicate)
            .await
            .map(|outcome| PlatformReady {
                ledger: ledger.clone(),
                outcome,
            });

        self.state = match result {
            Ok(_) => ReadinessState::Ready,
            Err(_) => ReadinessState::Failed,
        };
        self.result = Some(result.clone());
        result
    }

    pub fn reset(&mut self) {
        self.state = ReadinessState::Unknown;
        self.result = None;
    }
}
