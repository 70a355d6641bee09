use std::{future::Future, time::Duration};

use log::{debug, warn};
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use tokio::time::sleep;
use url::Url;

use super::*;

/// Configuration for ledger client retries and timeouts
#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
    /// Bound on one request, connecting included
    pub request_timeout: Duration,
    /// Extra attempts for retryable transport failures; 0 means a single request
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub commitment: Commitment,
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            commitment: Commitment::Confirmed,
        }
    }
}

impl LedgerClientConfig {
    /// One request per call, for callers that run their own retry policy
    pub fn single_shot(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Ledger node client with transport retries on top of the nonblocking `RpcClient`
pub struct LedgerClient {
    rpc: RpcClient,
    base_url: Url,
    config: LedgerClientConfig,
}

impl LedgerClient {
    /// Create a new ledger client with default configuration
    pub fn new(endpoint: &str) -> Result<Self, RpcError> {
        Self::with_config(endpoint, LedgerClientConfig::default())
    }

    pub fn with_config(endpoint: &str, config: LedgerClientConfig) -> Result<Self, RpcError> {
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!("http://{}", endpoint))
        }
        .map_err(|e| RpcError::InvalidUrl(format!("{}: {}", endpoint, e)))?;

        let rpc = RpcClient::new_with_timeout_and_commitment(
            base_url.to_string(),
            config.request_timeout,
            config.commitment.into(),
        );

        Ok(Self {
            rpc,
            base_url,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &LedgerClientConfig {
        &self.config
    }

    fn commitment(&self) -> CommitmentConfig {
        self.config.commitment.into()
    }

    fn classify(&self, err: ClientError) -> RpcError {
        RpcError::from_client(err, self.config.request_timeout)
    }

    /// Run `request`, repeating it on retryable transport failures
    async fn with_retry<T, F, Fut>(&self, method: &str, request: F) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        debug!("Making RPC request to {}: {}", self.base_url, method);

        let mut attempt = 0;
        loop {
            match request().await.map_err(|e| self.classify(e)) {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Retrying {} on {} (attempt {}/{}): {}",
                        method, self.base_url, attempt, self.config.max_retries, e
                    );
                    sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    debug!("{} on {} failed: {}", method, self.base_url, e);
                    return Err(e);
                }
            }
        }
    }

    pub async fn get_version(&self) -> Result<NodeVersion, RpcError> {
        self.with_retry("getVersion", || self.rpc.get_version())
            .await
            .map(NodeVersion::from)
    }

    /// Account at `address`, or `None` when nothing is stored there
    pub async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        let response = self
            .with_retry("getAccountInfo", || {
                self.rpc
                    .get_account_with_commitment(address, self.commitment())
            })
            .await?;
        Ok(response.value)
    }

    pub async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        self.with_retry("getBalance", || self.rpc.get_balance(address))
            .await
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.with_retry("getLatestBlockhash", || self.rpc.get_latest_blockhash())
            .await
    }

    pub async fn get_minimum_balance_for_rent_exemption(
        &self,
        space: usize,
    ) -> Result<u64, RpcError> {
        self.with_retry("getMinimumBalanceForRentExemption", || {
            self.rpc.get_minimum_balance_for_rent_exemption(space)
        })
        .await
    }

    /// Send once and wait for the configured commitment.
    ///
    /// Not retried: a resend after a lost response could land twice.
    pub async fn send_and_confirm_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<Signature, RpcError> {
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        debug!("Sending transaction {} to {}", signature, self.base_url);

        self.rpc
            .send_and_confirm_transaction(transaction)
            .await
            .map_err(|e| match e.get_transaction_error() {
                Some(error) => RpcError::TransactionFailed {
                    signature: signature.to_string(),
                    error: error.to_string(),
                },
                None => self.classify(e),
            })
    }

    /// Request an airdrop and wait until it reaches the configured commitment
    pub async fn request_airdrop(
        &self,
        address: &Pubkey,
        lamports: u64,
    ) -> Result<Signature, RpcError> {
        let signature = self
            .with_retry("requestAirdrop", || self.rpc.request_airdrop(address, lamports))
            .await?;
        self.rpc
            .poll_for_signature_with_commitment(&signature, self.commitment())
            .await
            .map_err(|e| self.classify(e))?;
        Ok(signature)
    }
}
