use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_client::rpc_response::RpcVersionInfo;
use solana_sdk::commitment_config::CommitmentConfig;

/// Commitment level the client reads and confirms at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown commitment level '{}'", other)),
        }
    }
}

impl From<Commitment> for CommitmentConfig {
    fn from(value: Commitment) -> Self {
        match value {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// What the node reports from `getVersion`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVersion {
    pub core: String,
    pub feature_set: Option<u32>,
}

impl From<RpcVersionInfo> for NodeVersion {
    fn from(info: RpcVersionInfo) -> Self {
        Self {
            core: info.solana_core,
            feature_set: info.feature_set,
        }
    }
}

#[cfg(test)]
mod tests {
    use solana_sdk::commitment_config::CommitmentLevel;

    use super::*;

    #[test]
    fn test_commitment_parse_and_order() {
        assert_eq!("Finalized".parse::<Commitment>(), Ok(Commitment::Finalized));
        assert!("max".parse::<Commitment>().is_err());
        assert!(Commitment::Finalized > Commitment::Confirmed);
    }

    #[test]
    fn test_commitment_maps_onto_client_levels() {
        let config: CommitmentConfig = Commitment::Processed.into();
        assert_eq!(config.commitment, CommitmentLevel::Processed);
        assert_eq!(
            CommitmentConfig::from(Commitment::Confirmed),
            CommitmentConfig::confirmed()
        );
    }

    #[test]
    fn test_version_info_is_carried_over() {
        let version = NodeVersion::from(RpcVersionInfo {
            solana_core: "1.18.26".into(),
            feature_set: Some(3_469_865_029),
        });
        assert_eq!(version.core, "1.18.26");
        assert_eq!(version.feature_set, Some(3_469_865_029));
    }
}
