use async_trait::async_trait;
use devnet_common::rpc::{LedgerClient, RpcError};
use solana_sdk::{
    account::Account, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};

/// Ledger operations the provisioner needs.
///
/// `submit` and `airdrop` return only once the transaction is confirmed. A
/// transaction the ledger refuses fails with [`RpcError::TransactionFailed`] and
/// leaves no state behind.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    fn ledger_url(&self) -> &str;

    async fn account(&self, address: &Pubkey) -> Result<Option<Account>, RpcError>;

    async fn balance(&self, address: &Pubkey) -> Result<u64, RpcError>;

    async fn minimum_balance_for_rent_exemption(&self, space: usize) -> Result<u64, RpcError>;

    async fn latest_blockhash(&self) -> Result<Hash, RpcError>;

    async fn submit(&self, transaction: &Transaction) -> Result<Signature, RpcError>;

    async fn airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature, RpcError>;
}

#[async_trait]
impl TokenLedger for LedgerClient {
    fn ledger_url(&self) -> &str {
        self.endpoint().as_str()
    }

    async fn account(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        self.get_account(address).await
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        self.get_balance(address).await
    }

    async fn minimum_balance_for_rent_exemption(&self, space: usize) -> Result<u64, RpcError> {
        self.get_minimum_balance_for_rent_exemption(space).await
    }

    async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.get_latest_blockhash().await
    }

    async fn submit(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        self.send_and_confirm_transaction(transaction).await
    }

    async fn airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature, RpcError> {
        self.request_airdrop(address, lamports).await
    }
}
