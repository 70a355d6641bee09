use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use devnet_common::rpc::{LedgerClient, NodeVersion, RpcError};
use log::{debug, info};

use super::{
    ProbeOutcome, ReadinessCheck, ReadinessPredicate, ReadinessProbe, ReadinessState,
    ServiceEndpoint,
};
use crate::error::BootstrapError;

/// Liveness view of the ledger node
#[async_trait]
pub trait LedgerHealth: Send + Sync {
    async fn version(&self) -> Result<NodeVersion, RpcError>;
}

#[async_trait]
impl LedgerHealth for LedgerClient {
    async fn version(&self) -> Result<NodeVersion, RpcError> {
        self.get_version().await
    }
}

/// Proof that the ledger answered a request during this run.
///
/// Only [`LedgerReadinessGate::wait`] creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReady {
    endpoint: ServiceEndpoint,
    version: String,
    outcome: ProbeOutcome,
}

impl LedgerReady {
    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn outcome(&self) -> ProbeOutcome {
        self.outcome
    }
}

struct VersionPredicate<'a> {
    health: &'a dyn LedgerHealth,
    version: OnceLock<String>,
}

#[async_trait]
impl ReadinessPredicate for VersionPredicate<'_> {
    async fn evaluate(&self, target: &ServiceEndpoint) -> Result<(), BootstrapError> {
        let version = self
            .health
            .version()
            .await
            .map_err(|e| BootstrapError::from_rpc(target.as_str(), e))?;
        debug!("{} reports version {}", target, version.core);
        let _ = self.version.set(version.core);
        Ok(())
    }
}

pub struct LedgerReadinessGate {
    probe: ReadinessProbe,
    health: Arc<dyn LedgerHealth>,
    check: ReadinessCheck,
    state: ReadinessState,
    result: Option<Result<LedgerReady, BootstrapError>>,
}

impl LedgerReadinessGate {
    pub fn new(
        probe: ReadinessProbe,
        health: Arc<dyn LedgerHealth>,
        check: ReadinessCheck,
    ) -> Self {
        Self {
            probe,
            health,
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

    /// Poll until the ledger answers or the check is exhausted.
    ///
    /// A finished gate returns its recorded result without polling again until
    /// [`reset`](Self::reset) is called.
    pub async fn wait(&mut self) -> Result<LedgerReady, BootstrapError> {
        if let Some(result) = &self.result {
            return result.clone();
        }

        info!("Waiting for ledger at {}", self.check.target);
        self.state = ReadinessState::Polling;

        let predicate = VersionPredicate {
            health: self.health.as_ref(),
            version: OnceLock::new(),
        };
        let result = self
            .probe
            .poll(&self.check, &predicate)
            .await
            .map(|outcome| LedgerReady {
                endpoint: self.check.target.clone(),
                version: predicate.version.into_inner().unwrap_or_default(),
                outcome,
            });

        self.state = match result {
            Ok(_) => ReadinessState::Ready,
            Err(_) => ReadinessState::Failed,
        };
        self.result = Some(result.clone());
        result
    }

    /// Forget the previous outcome so the next `wait` polls again
    pub fn reset(&mut self) {
        self.state = ReadinessState::Unknown;
        self.result = None;
    }
}
