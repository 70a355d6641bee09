//! Signing keys as stored in ledger key files.
//!
//! A key file is a JSON array of 64 integers: the 32-byte secret seed followed by
//! the 32-byte public key. The address of a key file is the base58 rendering of
//! its public half, so the same file always yields the same address.

use std::path::{Path, PathBuf};

use solana_sdk::{
    pubkey::Pubkey,
    signature::{keypair_from_seed, Keypair},
    signer::Signer,
};
use thiserror::Error;

/// Size of a serialized key pair (secret seed + public key)
pub const KEYPAIR_SIZE: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Cannot read key file '{path}': {reason}")]
    Unreadable { path: String, reason: String },

    /// Not a JSON array of 64 bytes
    #[error("Malformed key file '{path}': {reason}")]
    Malformed { path: String, reason: String },

    #[error("Key file '{0}' public key does not match its secret key")]
    Mismatch(String),
}

/// Parse the JSON array key file format.
///
/// The public half must belong to the secret half.
pub fn keypair_from_json(path: &Path, content: &str) -> Result<Keypair, KeyError> {
    let malformed = |reason: String| KeyError::Malformed {
        path: path.display().to_string(),
        reason,
    };

    let bytes: Vec<u8> = serde_json::from_str(content.trim())
        .map_err(|e| malformed(format!("expected a JSON array of bytes: {}", e)))?;
    if bytes.len() != KEYPAIR_SIZE {
        return Err(malformed(format!(
            "expected {} bytes, found {}",
            KEYPAIR_SIZE,
            bytes.len()
        )));
    }

    let keypair = keypair_from_seed(&bytes[..32]).map_err(|e| malformed(e.to_string()))?;
    if keypair.pubkey().to_bytes()[..] != bytes[32..] {
        return Err(KeyError::Mismatch(path.display().to_string()));
    }
    Ok(keypair)
}

/// Serialize to the JSON array key file format
pub fn keypair_to_json(keypair: &Keypair) -> String {
    let bytes: Vec<u8> = keypair.to_bytes().to_vec();
    // Vec<u8> always serializes
    serde_json::to_string(&bytes).unwrap_or_default()
}

/// A key file together with the key pair and address it resolves to.
///
/// Loaded once at startup and threaded explicitly to every component that signs.
#[derive(Debug)]
pub struct KeyMaterial {
    key_file_path: PathBuf,
    keypair: Keypair,
}

impl KeyMaterial {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KeyError> {
        let key_file_path = path.as_ref().to_path_buf();
        let content =
            std::fs::read_to_string(&key_file_path).map_err(|e| KeyError::Unreadable {
                path: key_file_path.display().to_string(),
                reason: e.to_string(),
            })?;
        let keypair = keypair_from_json(&key_file_path, &content)?;
        Ok(Self {
            key_file_path,
            keypair,
        })
    }

    pub fn from_keypair(key_file_path: PathBuf, keypair: Keypair) -> Self {
        Self {
            key_file_path,
            keypair,
        }
    }

    pub fn key_file_path(&self) -> &Path {
        &self.key_file_path
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn address(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}
