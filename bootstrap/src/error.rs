use std::{fmt, time::Duration};

use devnet_common::{keys::KeyError, rpc::RpcError};
use solana_sdk::program_error::ProgramError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// Endpoint unreachable or answered with something unusable; retryable
    #[error("Endpoint {endpoint} unavailable: {reason}")]
    Connectivity { endpoint: String, reason: String },
    /// Platform initialization ran and reported a definitive failure
    #[error("Initialization failed: {reason}")]
    Initialization { reason: String },
    /// Missing or invalid input, or on-chain state that contradicts it; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Gave up after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: Box<BootstrapError>,
    },
}

impl BootstrapError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Error from a ledger call made against `endpoint`
    pub fn from_rpc(endpoint: &str, err: RpcError) -> Self {
        match err {
            RpcError::InvalidUrl(reason) => Self::Configuration(reason),
            RpcError::Signing(reason) => Self::Configuration(reason),
            other => Self::Connectivity {
                endpoint: endpoint.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Innermost error, looking through exhaustion wrappers
    pub fn root_cause(&self) -> &BootstrapError {
        match self {
            Self::Exhausted { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}

impl From<KeyError> for BootstrapError {
    fn from(err: KeyError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Instruction builders only fail on arguments they cannot encode
impl From<ProgramError> for BootstrapError {
    fn from(err: ProgramError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Step of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Configuration,
    Ledger,
    Platform,
    Provisioning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Ledger => "ledger",
            Self::Platform => "platform",
            Self::Provisioning => "provisioning",
        };
        f.write_str(s)
    }
}

/// First failure of a run, tagged with where it happened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{stage}] {endpoint}: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    pub endpoint: String,
    pub error: BootstrapError,
}

impl StageFailure {
    pub fn new<S: Into<String>>(stage: Stage, endpoint: S, error: BootstrapError) -> Self {
        Self {
            stage,
            endpoint: endpoint.into(),
            error,
        }
    }
}
