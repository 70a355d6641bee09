//! Deterministic, replay-safe token provisioning
//!
//! Every step is check-then-act against the ledger, which stays the source of
//! truth: a run that died half way is finished by the next one, and a complete
//! run is a no-op apart from the reads.

use std::sync::Arc;

use dashmap::DashMap;
use devnet_common::{keys::KeyMaterial, rpc::RpcError};
use futures::future::join_all;
use log::{debug, info, warn};
use solana_sdk::{
    account::Account,
    instruction::Instruction,
    program_option::COption,
    program_pack::Pack,
    pubkey::{Pubkey, MAX_SEED_LEN},
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::{
    instruction::{initialize_mint2, mint_to, set_authority, AuthorityType},
    state::{Account as TokenAccount, Mint},
};
use tokio::sync::Mutex;

use crate::{error::BootstrapError, readiness::PlatformReady};

mod ledger;

pub use ledger::TokenLedger;

/// Token to stamp into the ledger
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub symbol: String,
    pub decimals: u8,
    pub initial_supply: u64,
    pub mint_authority: Arc<KeyMaterial>,
    /// Fixed mint keypair; without one the mint address is derived from the
    /// authority and the symbol
    pub mint_key: Option<Arc<KeyMaterial>>,
}

impl TokenSpec {
    pub fn new<S: Into<String>>(
        symbol: S,
        decimals: u8,
        initial_supply: u64,
        mint_authority: Arc<KeyMaterial>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            initial_supply,
            mint_authority,
            mint_key: None,
        }
    }

    pub fn with_mint_key(mut self, mint_key: Arc<KeyMaterial>) -> Self {
        self.mint_key = Some(mint_key);
        self
    }

    /// Seed for the derived mint address
    pub fn seed(&self) -> String {
        self.symbol.to_lowercase()
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.symbol.trim().is_empty() {
            return Err(BootstrapError::configuration("token symbol must not be empty"));
        }
        if self.mint_key.is_none() && self.seed().len() > MAX_SEED_LEN {
            return Err(BootstrapError::configuration(format!(
                "token symbol '{}' is longer than {} bytes",
                self.symbol, MAX_SEED_LEN
            )));
        }
        // Zero supply is how a provisioned mint is told apart from a fresh one
        if self.initial_supply == 0 {
            return Err(BootstrapError::configuration(format!(
                "initial supply of {} must be greater than zero",
                self.symbol
            )));
        }
        Ok(())
    }

    pub fn mint_address(&self) -> Result<Pubkey, BootstrapError> {
        match &self.mint_key {
            Some(key) => Ok(key.address()),
            None => Pubkey::create_with_seed(
                &self.mint_authority.address(),
                &self.seed(),
                &spl_token::id(),
            )
            .map_err(|e| {
                BootstrapError::configuration(format!(
                    "cannot derive a mint address for {}: {}",
                    self.symbol, e
                ))
            }),
        }
    }

    pub fn holding_account_address(&self) -> Result<Pubkey, BootstrapError> {
        Ok(get_associated_token_address(
            &self.mint_authority.address(),
            &self.mint_address()?,
        ))
    }
}

/// On-chain state of a provisioned token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub symbol: String,
    pub mint_address: Pubkey,
    pub holding_account_address: Pubkey,
    pub decimals: u8,
    pub minted_supply: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionAction {
    /// This call minted the supply
    Created,
    /// Supply was already minted; nothing was minted
    AlreadyProvisioned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub account: ProvisionedAccount,
    pub action: ProvisionAction,
}

/// Airdrop policy for the fee payer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPolicy {
    pub min_balance: u64,
    pub airdrop_lamports: u64,
}

pub struct AccountProvisioner {
    ledger: Arc<dyn TokenLedger>,
    payer: Arc<KeyMaterial>,
    funding: Option<FundingPolicy>,
    // Serializes provisioning of one mint within this process
    mint_locks: DashMap<Pubkey, Arc<Mutex<()>>>,
}

impl AccountProvisioner {
    pub fn new(ledger: Arc<dyn TokenLedger>, payer: Arc<KeyMaterial>) -> Self {
        Self {
            ledger,
            payer,
            funding: None,
            mint_locks: DashMap::new(),
        }
    }

    pub fn with_funding(mut self, funding: FundingPolicy) -> Self {
        self.funding = Some(funding);
        self
    }

    pub fn payer(&self) -> &KeyMaterial {
        &self.payer
    }

    fn ledger_error(&self, err: RpcError) -> BootstrapError {
        BootstrapError::from_rpc(self.ledger.ledger_url(), err)
    }

    /// Top up the fee payer when it is below the funding policy's minimum.
    ///
    /// Returns the payer balance after any airdrop.
    pub async fn ensure_payer_funded(
        &self,
        _ready: &PlatformReady,
    ) -> Result<u64, BootstrapError> {
        let payer = self.payer.address();
        let balance = self
            .ledger
            .balance(&payer)
            .await
            .map_err(|e| self.ledger_error(e))?;

        let Some(funding) = self.funding else {
            return Ok(balance);
        };
        if balance >= funding.min_balance {
            debug!("Payer {} holds {} lamports", payer, balance);
            return Ok(balance);
        }

        info!(
            "💧 Payer {} holds {} lamports, requesting airdrop of {}",
            payer, balance, funding.airdrop_lamports
        );
        self.ledger
            .airdrop(&payer, funding.airdrop_lamports)
            .await
            .map_err(|e| self.ledger_error(e))?;

        self.ledger
            .balance(&payer)
            .await
            .map_err(|e| self.ledger_error(e))
    }

    /// Provision every spec, independent mints concurrently
    pub async fn provision_all(
        &self,
        ready: &PlatformReady,
        specs: &[TokenSpec],
    ) -> Result<Vec<Provisioned>, BootstrapError> {
        join_all(specs.iter().map(|spec| self.provision(ready, spec)))
            .await
            .into_iter()
            .collect()
    }

    /// Bring one token to its provisioned state: mint exists with the requested
    /// decimals, the authority's holding account exists, and the supply has been
    /// minted exactly once.
    ///
    /// The supply is minted in the same transaction that revokes the mint
    /// authority, so across processes the ledger accepts only one mint. A write
    /// the ledger refuses because another provisioner got there first is read
    /// back and treated as already done.
    pub async fn provision(
        &self,
        _ready: &PlatformReady,
        spec: &TokenSpec,
    ) -> Result<Provisioned, BootstrapError> {
        spec.validate()?;
        let mint = spec.mint_address()?;
        let authority = spec.mint_authority.address();

        let lock = self.mint_locks.entry(mint).or_default().clone();
        let _guard = lock.lock().await;

        // Every check that can reject the token runs before the first write
        let state = match self.read_mint(&mint).await? {
            Some(state) => {
                debug!("Mint {} for {} already exists", mint, spec.symbol);
                state
            }
            None => {
                info!(
                    "🪙 Creating mint {} for {} ({} decimals)",
                    mint, spec.symbol, spec.decimals
                );
                match self.create_mint(spec, &mint).await? {
                    Submitted::Confirmed(_) => self.require_mint(&mint).await?,
                    Submitted::Rejected(err) => {
                        let state = self.read_mint(&mint).await?.ok_or(err)?;
                        info!("Mint {} for {} was created by another run", mint, spec.symbol);
                        state
                    }
                }
            }
        };
        check_mint(spec, &mint, &state)?;

        let holding = spec.holding_account_address()?;
        self.ensure_holding_account(spec, &mint, &holding).await?;

        let state = self.require_mint(&mint).await?;
        let action = if state.supply == 0 {
            if state.mint_authority != COption::Some(authority) {
                return Err(BootstrapError::configuration(format!(
                    "mint {} is not controlled by {}",
                    mint, authority
                )));
            }
            info!("Minting {} {} base units into {}", spec.initial_supply, spec.symbol, holding);
            match self.mint_supply(spec, &mint, &holding).await? {
                Submitted::Confirmed(_) => ProvisionAction::Created,
                Submitted::Rejected(err) => {
                    if self.require_mint(&mint).await?.supply == 0 {
                        return Err(err);
                    }
                    info!("{} was minted by another run", spec.symbol);
                    ProvisionAction::AlreadyProvisioned
                }
            }
        } else {
            info!("{} already provisioned with supply {}", spec.symbol, state.supply);
            ProvisionAction::AlreadyProvisioned
        };

        // Report what the ledger holds, not what was requested
        let state = self.require_mint(&mint).await?;
        if state.supply != spec.initial_supply {
            warn!(
                "{} supply is {} but the token config asks for {}",
                spec.symbol, state.supply, spec.initial_supply
            );
        }

        Ok(Provisioned {
            account: ProvisionedAccount {
                symbol: spec.symbol.clone(),
                mint_address: mint,
                holding_account_address: holding,
                decimals: state.decimals,
                minted_supply: state.supply,
            },
            action,
        })
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Account>, BootstrapError> {
        self.ledger
            .account(address)
            .await
            .map_err(|e| self.ledger_error(e))
    }

    async fn read_mint(&self, mint: &Pubkey) -> Result<Option<Mint>, BootstrapError> {
        let Some(account) = self.read_account(mint).await? else {
            return Ok(None);
        };

        if account.owner != spl_token::id() {
            return Err(BootstrapError::configuration(format!(
                "account {} is owned by {}, not the token program",
                mint, account.owner
            )));
        }
        let state = Mint::unpack(&account.data).map_err(|e| {
            BootstrapError::configuration(format!("account {} is not a mint: {}", mint, e))
        })?;
        Ok(Some(state))
    }

    async fn require_mint(&self, mint: &Pubkey) -> Result<Mint, BootstrapError> {
        self.read_mint(mint)
            .await?
            .ok_or_else(|| BootstrapError::Connectivity {
                endpoint: self.ledger.ledger_url().to_string(),
                reason: format!("mint {} not visible after creation", mint),
            })
    }

    async fn create_mint(
        &self,
        spec: &TokenSpec,
        mint: &Pubkey,
    ) -> Result<Submitted, BootstrapError> {
        let payer = self.payer.address();
        let authority = spec.mint_authority.address();
        let lamports = self
            .ledger
            .minimum_balance_for_rent_exemption(Mint::LEN)
            .await
            .map_err(|e| self.ledger_error(e))?;

        let (create, signer) = match &spec.mint_key {
            Some(key) => (
                system_instruction::create_account(
                    &payer,
                    mint,
                    lamports,
                    Mint::LEN as u64,
                    &spl_token::id(),
                ),
                key.keypair(),
            ),
            None => (
                system_instruction::create_account_with_seed(
                    &payer,
                    mint,
                    &authority,
                    &spec.seed(),
                    lamports,
                    Mint::LEN as u64,
                    &spl_token::id(),
                ),
                spec.mint_authority.keypair(),
            ),
        };
        let initialize =
            initialize_mint2(&spl_token::id(), mint, &authority, None, spec.decimals)?;

        self.submit(&[create, initialize], &[signer]).await
    }

    async fn ensure_holding_account(
        &self,
        spec: &TokenSpec,
        mint: &Pubkey,
        holding: &Pubkey,
    ) -> Result<(), BootstrapError> {
        let authority = spec.mint_authority.address();
        let account = match self.read_account(holding).await? {
            Some(account) => account,
            None => {
                info!("Creating holding account {} for {}", holding, spec.symbol);
                let instruction = create_associated_token_account_idempotent(
                    &self.payer.address(),
                    &authority,
                    mint,
                    &spl_token::id(),
                );
                match self.submit(&[instruction], &[]).await? {
                    Submitted::Confirmed(_) => return Ok(()),
                    Submitted::Rejected(err) => self.read_account(holding).await?.ok_or(err)?,
                }
            }
        };

        let state = TokenAccount::unpack(&account.data).map_err(|e| {
            BootstrapError::configuration(format!(
                "holding account {} is not a token account: {}",
                holding, e
            ))
        })?;
        if state.mint != *mint || state.owner != authority {
            return Err(BootstrapError::configuration(format!(
                "holding account {} belongs to mint {} and owner {}",
                holding, state.mint, state.owner
            )));
        }
        Ok(())
    }

    /// Mint the whole supply and give up the mint authority in one transaction
    async fn mint_supply(
        &self,
        spec: &TokenSpec,
        mint: &Pubkey,
        holding: &Pubkey,
    ) -> Result<Submitted, BootstrapError> {
        let authority = spec.mint_authority.address();
        let instructions = [
            mint_to(&spl_token::id(), mint, holding, &authority, &[], spec.initial_supply)?,
            set_authority(
                &spl_token::id(),
                mint,
                None,
                AuthorityType::MintTokens,
                &authority,
                &[],
            )?,
        ];
        self.submit(&instructions, &[spec.mint_authority.keypair()])
            .await
    }

    async fn submit(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
    ) -> Result<Submitted, BootstrapError> {
        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(|e| self.ledger_error(e))?;

        let payer = self.payer.address();
        let mut transaction = Transaction::new_with_payer(instructions, Some(&payer));
        let mut all_signers: Vec<&dyn Signer> = vec![self.payer.keypair()];
        all_signers.extend(signers.iter().map(|signer| *signer as &dyn Signer));
        transaction
            .try_sign(&all_signers, blockhash)
            .map_err(|e| BootstrapError::configuration(e.to_string()))?;

        match self.ledger.submit(&transaction).await {
            Ok(signature) => {
                debug!("Transaction {} confirmed", signature);
                Ok(Submitted::Confirmed(signature))
            }
            Err(e) if e.is_rejection() => {
                debug!("Ledger refused transaction: {}", e);
                Ok(Submitted::Rejected(self.ledger_error(e)))
            }
            Err(e) => Err(self.ledger_error(e)),
        }
    }
}

/// Result of a transaction that reached the ledger
enum Submitted {
    Confirmed(Signature),
    /// Refused with no effect; the error to report if the state does not explain why
    Rejected(BootstrapError),
}

fn check_mint(spec: &TokenSpec, mint: &Pubkey, state: &Mint) -> Result<(), BootstrapError> {
    if state.decimals != spec.decimals {
        return Err(BootstrapError::configuration(format!(
            "mint {} for {} has {} decimals, expected {}",
            mint, spec.symbol, state.decimals, spec.decimals
        )));
    }
    let authority = spec.mint_authority.address();
    if state.supply == 0 && state.mint_authority != COption::Some(authority) {
        return Err(BootstrapError::configuration(format!(
            "mint {} for {} is not controlled by {}",
            mint, spec.symbol, authority
        )));
    }
    Ok(())
}
