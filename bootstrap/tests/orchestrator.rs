mod common;

use common::{
    key, ledger_gate, paused_clock, platform_gate, InMemoryLedger, MockInitializer,
    MockLedgerHealth, LEDGER_URL,
};
use devnet_bootstrap::{
    error::{BootstrapError, Stage},
    orchestrator::{BootstrapOrchestrator, BootstrapState},
    provision::{AccountProvisioner, ProvisionAction, TokenSpec},
    topology::Topology,
};

const SUPPLY: u64 = 100_000_000_000;

fn tokens() -> Vec<TokenSpec> {
    vec![
        TokenSpec::new("USDC", 6, SUPPLY, key(1)),
        TokenSpec::new("WBTC", 8, SUPPLY, key(1)),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_full_run_walks_every_state() {
    let ledger = InMemoryLedger::new();
    let initializer = MockInitializer::after(1);
    let mut orchestrator =
        BootstrapOrchestrator::new(paused_clock(), ledger_gate(MockLedgerHealth::after(2), 5))
            .with_platform(platform_gate(initializer.clone(), 5))
            .with_provisioning(AccountProvisioner::new(ledger.clone(), key(1)), tokens())
            .with_topology(Topology::default_devnet().unwrap());

    let report = orchestrator.run().await.unwrap();
    assert_eq!(
        report.history,
        [
            BootstrapState::Init,
            BootstrapState::LedgerWait,
            BootstrapState::PlatformWait,
            BootstrapState::Provisioning,
            BootstrapState::Ready,
        ]
    );
    assert_eq!(orchestrator.state(), BootstrapState::Ready);
    assert_eq!(report.ledger.outcome().attempts, 3);
    assert_eq!(initializer.calls(), 2);
    assert!(report.platform.is_some());
    assert_eq!(report.released_services, ["proxy", "faucet"]);

    let symbols: Vec<_> = report
        .provisioned
        .iter()
        .map(|p| (p.account.symbol.as_str(), p.action))
        .collect();
    assert_eq!(
        symbols,
        [("USDC", ProvisionAction::Created), ("WBTC", ProvisionAction::Created)]
    );
    assert_eq!(ledger.transactions(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_dead_ledger_never_reaches_the_platform() {
    let health = MockLedgerHealth::down();
    let initializer = MockInitializer::ok();
    let mut orchestrator =
        BootstrapOrchestrator::new(paused_clock(), ledger_gate(health.clone(), 4))
            .with_platform(platform_gate(initializer.clone(), 4));

    let failure = orchestrator.run().await.unwrap_err();
    assert_eq!(failure.stage, Stage::Ledger);
    assert_eq!(failure.endpoint, LEDGER_URL);
    assert!(matches!(
        failure.error,
        BootstrapError::Exhausted { attempts: 4, .. }
    ));
    assert_eq!(health.calls(), 4);
    assert_eq!(initializer.calls(), 0);
    assert_eq!(
        orchestrator.history(),
        [BootstrapState::Init, BootstrapState::LedgerWait, BootstrapState::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_platform_failure_stops_before_provisioning() {
    let ledger = InMemoryLedger::new();
    let initializer = MockInitializer::after(u32::MAX);
    let mut orchestrator =
        BootstrapOrchestrator::new(paused_clock(), ledger_gate(MockLedgerHealth::up(), 1))
            .with_platform(platform_gate(initializer.clone(), 3))
            .with_provisioning(AccountProvisioner::new(ledger.clone(), key(1)), tokens());

    let failure = orchestrator.run().await.unwrap_err();
    assert_eq!(failure.stage, Stage::Platform);
    assert!(matches!(
        failure.error.root_cause(),
        BootstrapError::Initialization { .. }
    ));
    assert_eq!(initializer.calls(), 3);
    assert_eq!(orchestrator.state(), BootstrapState::Failed);
    assert!(ledger.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_failure_is_tagged_with_its_stage() {
    let ledger = InMemoryLedger::new();
    let usdc = TokenSpec::new("USDC", 6, SUPPLY, key(1));
    ledger.seed_mint(usdc.mint_address().unwrap(), key(1).address(), 8, 0);

    let mut orchestrator =
        BootstrapOrchestrator::new(paused_clock(), ledger_gate(MockLedgerHealth::up(), 1))
            .with_platform(platform_gate(MockInitializer::ok(), 1))
            .with_provisioning(AccountProvisioner::new(ledger.clone(), key(1)), vec![usdc]);

    let failure = orchestrator.run().await.unwrap_err();
    assert_eq!(failure.stage, Stage::Provisioning);
    assert!(failure.error.is_configuration(), "{failure}");
    assert_eq!(
        orchestrator.history(),
        [
            BootstrapState::Init,
            BootstrapState::LedgerWait,
            BootstrapState::PlatformWait,
            BootstrapState::Provisioning,
            BootstrapState::Failed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_without_a_platform_gate_is_rejected() {
    let health = MockLedgerHealth::up();
    let ledger = InMemoryLedger::new();
    let mut orchestrator =
        BootstrapOrchestrator::new(paused_clock(), ledger_gate(health.clone(), 1))
            .with_provisioning(AccountProvisioner::new(ledger, key(1)), tokens());

    let failure = orchestrator.run().await.unwrap_err();
    assert_eq!(failure.stage, Stage::Configuration);
    assert_eq!(health.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_topology_releases_only_its_dependents() {
    let topology = Topology::from_yaml_str(
        r#"
services:
  ledger:
    role: ledger
    endpoint: http://solana:8899
  bootstrap:
    role: bootstrap
    depends_on:
      ledger:
        condition: service_healthy
  indexer:
    depends_on:
      bootstrap:
        condition: service_completed_successfully
  explorer:
    depends_on:
      ledger:
        condition: service_started
"#,
    )
    .unwrap();

    let gate = ledger_gate(MockLedgerHealth::up(), 1);
    let mut orchestrator = BootstrapOrchestrator::new(paused_clock(), gate).with_topology(topology);
    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.released_services, ["indexer"]);
}
