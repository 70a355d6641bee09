//! Declarative service graph of the devnet environment
//!
//! The container platform owns starting and networking the services; this module
//! only reads the graph to learn where the ledger lives, check that the
//! dependency edges form a DAG, and name the services a finished bootstrap
//! releases.

use std::{collections::VecDeque, fmt, path::Path};

use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{error::BootstrapError, readiness::ServiceEndpoint};

/// What a service contributes to the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Ledger,
    Platform,
    Bootstrap,
    #[default]
    Application,
}

/// When a dependency edge is satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyCondition {
    #[default]
    #[serde(alias = "service_started")]
    Started,
    #[serde(alias = "service_healthy")]
    Ready,
    #[serde(alias = "service_completed_successfully")]
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub condition: DependencyCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(default)]
    pub role: ServiceRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// URL other services use to reach this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub depends_on: IndexMap<String, Dependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Topology {
    pub services: IndexMap<String, ServiceDescriptor>,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} service(s)", self.services.len())
    }
}

fn parse_error(format: &str, e: impl fmt::Display) -> BootstrapError {
    BootstrapError::configuration(format!("invalid {} topology: {}", format, e))
}

impl Topology {
    pub fn from_yaml_str(content: &str) -> Result<Self, BootstrapError> {
        let topology: Self = serde_yaml::from_str(content).map_err(|e| parse_error("YAML", e))?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn from_json_str(content: &str) -> Result<Self, BootstrapError> {
        let topology: Self = serde_json::from_str(content).map_err(|e| parse_error("JSON", e))?;
        topology.validate()?;
        Ok(topology)
    }

    /// Load a topology file; `.json` files are JSON, anything else YAML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BootstrapError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::configuration(format!(
                "Failed to read topology '{}': {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        for (name, service) in &self.services {
            for dependency in service.depends_on.keys() {
                if dependency == name {
                    return Err(BootstrapError::configuration(format!(
                        "service {} depends on itself",
                        name
                    )));
                }
                if !self.services.contains_key(dependency) {
                    return Err(BootstrapError::configuration(format!(
                        "service {} depends on unknown service {}",
                        name, dependency
                    )));
                }
            }
            if let Some(endpoint) = &service.endpoint {
                ServiceEndpoint::parse(endpoint)?;
            }
        }

        let ledgers = self.services_with_role(ServiceRole::Ledger);
        if ledgers.len() > 1 {
            return Err(BootstrapError::configuration(format!(
                "topology declares more than one ledger: {}",
                ledgers.join(", ")
            )));
        }

        self.startup_order().map(|_| ())
    }

    pub fn services_with_role(&self, role: ServiceRole) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, service)| service.role == role)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Services in an order that starts every dependency first.
    ///
    /// Ties keep declaration order, so the same file always yields the same order.
    pub fn startup_order(&self) -> Result<Vec<&str>, BootstrapError> {
        let mut pending: IndexMap<&str, usize> = self
            .services
            .iter()
            .map(|(name, service)| (name.as_str(), service.depends_on.len()))
            .collect();
        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(self.services.len());
        while let Some(name) = ready.pop_front() {
            order.push(name);
            for (dependent, service) in &self.services {
                if !service.depends_on.contains_key(name) {
                    continue;
                }
                if let Some(count) = pending.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != self.services.len() {
            let stuck: Vec<&str> = pending
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(name, _)| *name)
                .collect();
            return Err(BootstrapError::configuration(format!(
                "dependency cycle between {}",
                stuck.join(", ")
            )));
        }

        debug!("Startup order: {}", order.join(" -> "));
        Ok(order)
    }

    /// Endpoint of the ledger service, if the topology declares one with an endpoint
    pub fn ledger_endpoint(&self) -> Result<Option<ServiceEndpoint>, BootstrapError> {
        self.services
            .values()
            .find(|service| service.role == ServiceRole::Ledger)
            .and_then(|service| service.endpoint.as_deref())
            .map(ServiceEndpoint::parse)
            .transpose()
    }

    /// Every service that transitively depends on `name`, in declaration order
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let mut found: IndexSet<&str> = IndexSet::new();
        let mut queue = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            for (dependent, service) in &self.services {
                if service.depends_on.contains_key(current) && found.insert(dependent.as_str()) {
                    queue.push_back(dependent.as_str());
                }
            }
        }

        self.services
            .keys()
            .map(String::as_str)
            .filter(|service| found.contains(service))
            .collect()
    }

    /// Services that become usable once every bootstrap service has finished
    pub fn released_by_bootstrap(&self) -> Vec<&str> {
        let bootstrap = self.services_with_role(ServiceRole::Bootstrap);
        let mut released: IndexSet<&str> = IndexSet::new();
        for name in &bootstrap {
            released.extend(self.dependents(name));
        }

        self.services
            .keys()
            .map(String::as_str)
            .filter(|service| released.contains(service))
            .collect()
    }

    /// Graph of the stock devnet: ledger, platform, deploy job and the services
    /// that wait for it
    pub fn default_devnet() -> Result<Self, BootstrapError> {
        const YAML: &str = r#"
services:
  solana:
    role: ledger
    endpoint: http://solana:8899
    ports: ["8899:8899", "8900:8900"]
  evm_loader:
    role: platform
    environment:
      SOLANA_URL: http://solana:8899
    depends_on:
      solana: { condition: ready }
  deploy:
    role: bootstrap
    environment:
      SOLANA_URL: http://solana:8899
    depends_on:
      evm_loader: { condition: completed }
  postgres:
    endpoint: postgres://postgres:5432
    ports: ["5432:5432"]
  proxy:
    environment:
      SOLANA_URL: http://solana:8899
    ports: ["9090:9090"]
    depends_on:
      postgres: { condition: ready }
      deploy: { condition: completed }
  faucet:
    environment:
      SOLANA_URL: http://solana:8899
    ports: ["3333:3333"]
    depends_on:
      deploy: { condition: completed }
"#;
        Self::from_yaml_str(YAML)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_devnet_is_valid() {
        let topology = Topology::default_devnet().unwrap();
        assert_eq!(topology.services.len(), 6);
        topology.validate().unwrap();

        assert_eq!(
            topology.ledger_endpoint().unwrap().unwrap().as_str(),
            "http://solana:8899/"
        );
        assert_eq!(
            topology.services["proxy"].depends_on["deploy"].condition,
            DependencyCondition::Completed
        );
    }

    #[test]
    fn test_startup_order_respects_dependencies() {
        let topology = Topology::default_devnet().unwrap();
        let order = topology.startup_order().unwrap();
        assert_eq!(
            order,
            ["solana", "postgres", "evm_loader", "deploy", "proxy", "faucet"]
        );
    }

    #[test]
    fn test_bootstrap_releases_its_dependents() {
        let topology = Topology::default_devnet().unwrap();
        assert_eq!(topology.released_by_bootstrap(), ["proxy", "faucet"]);
        assert_eq!(
            topology.dependents("solana"),
            ["evm_loader", "deploy", "proxy", "faucet"]
        );
    }

    #[test]
    fn test_compose_condition_names() {
        let topology = Topology::from_yaml_str(
            r#"
services:
  solana: { role: ledger }
  app:
    depends_on:
      solana: { condition: service_healthy }
"#,
        )
        .unwrap();
        assert_eq!(
            topology.services["app"].depends_on["solana"].condition,
            DependencyCondition::Ready
        );
    }

    #[test]
    fn test_invalid_graphs_are_rejected() {
        let unknown = r#"{"services": {"app": {"depends_on": {"db": {}}}}}"#;
        assert!(Topology::from_json_str(unknown).unwrap_err().is_configuration());

        let self_dep = r#"{"services": {"app": {"depends_on": {"app": {}}}}}"#;
        assert!(Topology::from_json_str(self_dep).unwrap_err().is_configuration());

        let cycle = r#"
services:
  a: { depends_on: { b: {} } }
  b: { depends_on: { c: {} } }
  c: { depends_on: { a: {} } }
  d: {}
"#;
        let err = Topology::from_yaml_str(cycle).unwrap_err();
        assert_eq!(
            err,
            BootstrapError::configuration("dependency cycle between a, b, c")
        );

        let two_ledgers = r#"
services:
  one: { role: ledger }
  two: { role: ledger }
"#;
        assert!(Topology::from_yaml_str(two_ledgers).unwrap_err().is_configuration());

        let bad_endpoint = r#"{"services": {"db": {"endpoint": "nope"}}}"#;
        assert!(Topology::from_json_str(bad_endpoint).unwrap_err().is_configuration());
    }

    #[test]
    fn test_load_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("topology.json");
        std::fs::write(&json, r#"{"services": {"solana": {"role": "ledger"}}}"#).unwrap();
        let yaml = dir.path().join("topology.yml");
        std::fs::write(&yaml, "services:\n  solana:\n    role: ledger\n").unwrap();

        assert_eq!(Topology::load(&json).unwrap(), Topology::load(&yaml).unwrap());
        assert!(Topology::load(dir.path().join("missing.yml"))
            .unwrap_err()
            .is_configuration());
    }
}
