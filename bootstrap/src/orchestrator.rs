//! Sequencing of a bootstrap run
//!
//! `Init → LedgerWait → PlatformWait → Provisioning → Ready`, or `Failed` from any
//! state. Each stage finishes before the next starts and the first failure ends
//! the run; nothing is rolled back, a rerun converges instead.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use log::{error, info};
use tokio::time::Instant;

use crate::{
    clock::Clock,
    error::{BootstrapError, Stage, StageFailure},
    provision::{AccountProvisioner, Provisioned, TokenSpec},
    readiness::{LedgerReadinessGate, LedgerReady, PlatformReadinessGate, PlatformReady},
    topology::Topology,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootstrapState {
    Init,
    LedgerWait,
    PlatformWait,
    Provisioning,
    Ready,
    Failed,
}

impl BootstrapState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::LedgerWait => "ledger-wait",
            Self::PlatformWait => "platform-wait",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything a successful run established
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub ledger: LedgerReady,
    pub platform: Option<PlatformReady>,
    pub provisioned: Vec<Provisioned>,
    /// Topology services that may now start
    pub released_services: Vec<String>,
    pub history: Vec<BootstrapState>,
    pub elapsed: Duration,
}

struct ProvisioningStage {
    provisioner: AccountProvisioner,
    specs: Vec<TokenSpec>,
}

pub struct BootstrapOrchestrator {
    clock: Arc<dyn Clock>,
    ledger_gate: LedgerReadinessGate,
    platform_gate: Option<PlatformReadinessGate>,
    provisioning: Option<ProvisioningStage>,
    topology: Option<Topology>,
    budget: Option<Duration>,
    state: BootstrapState,
    history: Vec<BootstrapState>,
}

impl BootstrapOrchestrator {
    pub fn new(clock: Arc<dyn Clock>, ledger_gate: LedgerReadinessGate) -> Self {
        Self {
            clock,
            ledger_gate,
            platform_gate: None,
            provisioning: None,
            topology: None,
            budget: None,
            state: BootstrapState::Init,
            history: vec![BootstrapState::Init],
        }
    }

    pub fn with_platform(mut self, gate: PlatformReadinessGate) -> Self {
        self.platform_gate = Some(gate);
        self
    }

    /// Provision `specs` once the platform is ready; needs a platform gate
    pub fn with_provisioning(
        mut self,
        provisioner: AccountProvisioner,
        specs: Vec<TokenSpec>,
    ) -> Self {
        self.provisioning = Some(ProvisioningStage { provisioner, specs });
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Upper bound on the whole run, across every stage
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn history(&self) -> &[BootstrapState] {
        &self.history
    }

    fn transition(&mut self, next: BootstrapState) {
        // Forward only; Failed and Ready end the run
        if self.state.is_terminal() || next <= self.state {
            return;
        }
        info!("Bootstrap {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn endpoint(&self) -> String {
        self.ledger_gate.check().target.to_string()
    }

    fn fail(&mut self, stage: Stage, error: BootstrapError) -> StageFailure {
        let failure = StageFailure::new(stage, self.endpoint(), error);
        error!("❌ {}", failure);
        self.transition(BootstrapState::Failed);
        failure
    }

    /// Drive the run to Ready or to the first failure.
    ///
    /// A finished orchestrator does not run again.
    pub async fn run(&mut self) -> Result<BootstrapReport, StageFailure> {
        if self.state != BootstrapState::Init {
            let error = BootstrapError::configuration(format!(
                "bootstrap already ran, state is {}",
                self.state
            ));
            return Err(StageFailure::new(Stage::Configuration, self.endpoint(), error));
        }
        if self.provisioning.is_some() && self.platform_gate.is_none() {
            return Err(self.fail(
                Stage::Configuration,
                BootstrapError::configuration("provisioning requires a platform readiness gate"),
            ));
        }

        let start = self.clock.now();
        let endpoint = self.endpoint();

        self.transition(BootstrapState::LedgerWait);
        let result = within_budget(
            self.clock.as_ref(),
            self.budget,
            start,
            &endpoint,
            self.ledger_gate.wait(),
        )
        .await;
        let ledger = match result {
            Ok(ready) => ready,
            Err(e) => return Err(self.fail(Stage::Ledger, e)),
        };
        info!("✅ Ledger {} ready (version {})", ledger.endpoint(), ledger.version());

        let mut platform = None;
        if let Some(mut gate) = self.platform_gate.take() {
            self.transition(BootstrapState::PlatformWait);
            let result = within_budget(
                self.clock.as_ref(),
                self.budget,
                start,
                &endpoint,
                gate.wait(&ledger),
            )
            .await;
            self.platform_gate = Some(gate);
            match result {
                Ok(ready) => {
                    info!("✅ Platform initialized against {}", ready.ledger().endpoint());
                    platform = Some(ready);
                }
                Err(e) => return Err(self.fail(Stage::Platform, e)),
            }
        }

        let mut provisioned = Vec::new();
        if let (Some(stage), Some(ready)) = (self.provisioning.take(), platform.as_ref()) {
            self.transition(BootstrapState::Provisioning);
            let result = within_budget(self.clock.as_ref(), self.budget, start, &endpoint, async {
                stage.provisioner.ensure_payer_funded(ready).await?;
                stage.provisioner.provision_all(ready, &stage.specs).await
            })
            .await;
            self.provisioning = Some(stage);
            match result {
                Ok(accounts) => provisioned = accounts,
                Err(e) => return Err(self.fail(Stage::Provisioning, e)),
            }
            info!("✅ Provisioned {} token(s)", provisioned.len());
        }

        self.transition(BootstrapState::Ready);
        let released_services = self
            .topology
            .as_ref()
            .map(|topology| {
                topology
                    .released_by_bootstrap()
                    .into_iter()
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(BootstrapReport {
            ledger,
            platform,
            provisioned,
            released_services,
            history: self.history.clone(),
            elapsed: self.clock.now().saturating_duration_since(start),
        })
    }
}

/// Run one stage against what is left of the run's budget
async fn within_budget<T, F>(
    clock: &dyn Clock,
    budget: Option<Duration>,
    start: Instant,
    endpoint: &str,
    stage: F,
) -> Result<T, BootstrapError>
where
    F: Future<Output = Result<T, BootstrapError>>,
{
    let Some(budget) = budget else {
        return stage.await;
    };

    let elapsed = clock.now().saturating_duration_since(start);
    let expired = || BootstrapError::Exhausted {
        attempts: 0,
        elapsed: clock.now().saturating_duration_since(start),
        last_error: Box::new(BootstrapError::Connectivity {
            endpoint: endpoint.to_string(),
            reason: format!("bootstrap budget of {:?} used up", budget),
        }),
    };
    let remaining = budget.saturating_sub(elapsed);
    if remaining.is_zero() {
        return Err(expired());
    }

    tokio::select! {
        result = stage => result,
        _ = clock.sleep(remaining) => Err(expired()),
    }
}
