//! Readiness gating and deterministic token provisioning for the devnet
//! environment.
//!
//! A run waits for the ledger node, then for the execution-compatibility
//! platform, then provisions the test tokens, and exits 0 only when all of it
//! holds. The binaries in `src/bin` are thin wrappers over [`cli`].

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provision;
pub mod readiness;
pub mod topology;
