use std::time::Duration;

use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    rpc_request::RpcError as ClientRpcError,
};
use solana_sdk::signer::SignerError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Invalid endpoint URL '{0}'")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Transport(String),
    #[error("HTTP error {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    /// The ledger executed or simulated the transaction and rejected it
    #[error("Transaction {signature} failed on-chain: {error}")]
    TransactionFailed { signature: String, error: String },
    #[error("Transaction not confirmed: {0}")]
    Unconfirmed(String),
    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Classify a client failure; `timeout` is the request timeout it ran under
    pub fn from_client(err: ClientError, timeout: Duration) -> Self {
        match err.kind {
            ClientErrorKind::Reqwest(e) if e.is_timeout() => Self::Timeout(timeout),
            ClientErrorKind::Reqwest(e) if e.is_connect() => Self::Connect(e.to_string()),
            ClientErrorKind::Reqwest(e) => match e.status() {
                Some(status) => Self::Http {
                    status: status.as_u16(),
                    reason: status
                        .canonical_reason()
                        .unwrap_or("Unknown error")
                        .to_string(),
                },
                None => Self::Transport(e.to_string()),
            },
            ClientErrorKind::Io(e) => Self::Transport(e.to_string()),
            ClientErrorKind::RpcError(ClientRpcError::RpcResponseError {
                code, message, ..
            }) => Self::Rpc { code, message },
            // Raised when a sent transaction never reaches the commitment level
            ClientErrorKind::RpcError(ClientRpcError::ForUser(message)) => {
                Self::Unconfirmed(message)
            }
            ClientErrorKind::RpcError(other) => Self::Malformed(other.to_string()),
            ClientErrorKind::SerdeJson(e) => Self::Malformed(e.to_string()),
            ClientErrorKind::SigningError(e) => Self::Signing(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidUrl(_)
            | Self::Rpc { .. }
            | Self::Malformed(_)
            | Self::Signing(_)
            | Self::TransactionFailed { .. }
            | Self::Unconfirmed(_)
            | Self::Other(_) => false,
        }
    }

    /// Endpoint could not be reached at all, as opposed to answering badly
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Timeout(_) | Self::Transport(_) | Self::Http { .. }
        )
    }

    /// The ledger saw the transaction and refused it, so its effects did not apply
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::TransactionFailed { .. })
    }
}

impl From<SignerError> for RpcError {
    fn from(err: SignerError) -> Self {
        Self::Signing(err.to_string())
    }
}
