// Shared fixtures for the bootstrap integration tests
//
// `InMemoryLedger` executes the system, token and associated-token instructions
// the provisioner sends, one transaction at a time and all-or-nothing, so tests
// can check the exact on-chain outcome of a provisioning run.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use devnet_bootstrap::{
    clock::{Clock, PausedClock},
    error::BootstrapError,
    provision::TokenLedger,
    readiness::{
        LedgerHealth, LedgerReadinessGate, PlatformInitializer, PlatformReadinessGate,
        PlatformReady, ReadinessCheck, ReadinessProbe, ServiceEndpoint,
    },
};
use devnet_common::{
    keys::KeyMaterial,
    rpc::{NodeVersion, RpcError},
};
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::CompiledInstruction,
    message::Message,
    program_option::COption,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{keypair_from_seed, Signature},
    system_program,
    transaction::Transaction,
};
use spl_token::{
    instruction::{AuthorityType, TokenInstruction},
    state::{Account as TokenAccount, AccountState, Mint},
};

pub const LEDGER_URL: &str = "http://solana:8899/";

pub fn key(seed: u8) -> Arc<KeyMaterial> {
    Arc::new(KeyMaterial::from_keypair(
        PathBuf::from(format!("/keys/{}.json", seed)),
        keypair_from_seed(&[seed; 32]).unwrap(),
    ))
}

pub fn endpoint() -> ServiceEndpoint {
    ServiceEndpoint::parse(LEDGER_URL).unwrap()
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_key(data: &[u8], at: usize) -> Pubkey {
    Pubkey::try_from(&data[at..at + 32]).unwrap()
}

fn packed<T: Pack>(state: T) -> Vec<u8> {
    let mut data = vec![0; T::LEN];
    T::pack(state, &mut data).unwrap();
    data
}

fn token_account_data(mint: Pubkey, owner: Pubkey, amount: u64) -> Vec<u8> {
    packed(TokenAccount {
        mint,
        owner,
        amount,
        state: AccountState::Initialized,
        ..TokenAccount::default()
    })
}

/// Ledger state held in memory; every submitted transaction is executed
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<Pubkey, Account>>,
    transactions: AtomicUsize,
    rejected: AtomicUsize,
    airdrops: AtomicUsize,
    reads: AtomicUsize,
    /// Submissions left that fail with a transport error before executing
    failing_submissions: AtomicU32,
    /// Submissions left that the ledger refuses without executing
    refused_submissions: AtomicU32,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transactions executed
    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Transactions refused on execution
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn airdrops(&self) -> usize {
        self.airdrops.load(Ordering::SeqCst)
    }

    pub fn fail_next_submissions(&self, count: u32) {
        self.failing_submissions.store(count, Ordering::SeqCst);
    }

    pub fn refuse_next_submissions(&self, count: u32) {
        self.refused_submissions.store(count, Ordering::SeqCst);
    }

    pub fn get(&self, address: &Pubkey) -> Option<Account> {
        self.accounts.lock().unwrap().get(address).cloned()
    }

    pub fn snapshot(&self) -> HashMap<Pubkey, Account> {
        self.accounts.lock().unwrap().clone()
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        self.accounts.lock().unwrap().insert(address, account);
    }

    pub fn mint(&self, address: &Pubkey) -> Option<Mint> {
        self.get(address).and_then(|a| Mint::unpack(&a.data).ok())
    }

    pub fn token_account(&self, address: &Pubkey) -> Option<TokenAccount> {
        self.get(address)
            .and_then(|a| TokenAccount::unpack(&a.data).ok())
    }

    /// Put an initialized mint at `address`, as a previous deployment would have
    pub fn seed_mint(&self, address: Pubkey, authority: Pubkey, decimals: u8, supply: u64) {
        self.set_account(
            address,
            Account {
                lamports: 1_461_600,
                owner: spl_token::id(),
                data: packed(Mint {
                    mint_authority: COption::Some(authority),
                    supply,
                    decimals,
                    is_initialized: true,
                    freeze_authority: COption::None,
                }),
                ..Account::default()
            },
        );
    }

    pub fn seed_token_account(&self, address: Pubkey, mint: Pubkey, owner: Pubkey, amount: u64) {
        self.set_account(
            address,
            Account {
                lamports: 2_039_280,
                owner: spl_token::id(),
                data: token_account_data(mint, owner, amount),
                ..Account::default()
            },
        );
    }

    pub fn seed_program(&self, address: Pubkey) {
        self.set_account(
            address,
            Account {
                lamports: 1,
                executable: true,
                ..Account::default()
            },
        );
    }

    fn execute(&self, transaction: &Transaction) -> Result<(), String> {
        transaction.verify().map_err(|e| e.to_string())?;

        let message = &transaction.message;
        let mut accounts = self.accounts.lock().unwrap();
        let mut state = accounts.clone();
        for instruction in &message.instructions {
            execute_instruction(&mut state, message, instruction)?;
        }
        *accounts = state;
        Ok(())
    }
}

fn execute_instruction(
    state: &mut HashMap<Pubkey, Account>,
    message: &Message,
    instruction: &CompiledInstruction,
) -> Result<(), String> {
    let program = message.account_keys[instruction.program_id_index as usize];
    let key = |position: usize| -> Result<Pubkey, String> {
        instruction
            .accounts
            .get(position)
            .map(|index| message.account_keys[*index as usize])
            .ok_or_else(|| format!("missing account {}", position))
    };
    let signed = |position: usize| {
        instruction
            .accounts
            .get(position)
            .map(|index| message.is_signer(*index as usize))
            .unwrap_or(false)
    };
    let data = &instruction.data;

    if program == system_program::id() {
        let tag = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let (address, lamports, space, owner) = match tag {
            0 => {
                if !signed(1) {
                    return Err("new account did not sign".to_string());
                }
                (key(1)?, read_u64(data, 4), read_u64(data, 12), read_key(data, 20))
            }
            3 => {
                let base = read_key(data, 4);
                let seed_len = read_u64(data, 36) as usize;
                let seed = std::str::from_utf8(&data[44..44 + seed_len])
                    .map_err(|e| e.to_string())?;
                let rest = 44 + seed_len;
                let owner = read_key(data, rest + 16);
                let address = key(1)?;
                let derived =
                    Pubkey::create_with_seed(&base, seed, &owner).map_err(|e| e.to_string())?;
                if derived != address {
                    return Err("address does not match seed".to_string());
                }
                (address, read_u64(data, rest), read_u64(data, rest + 8), owner)
            }
            other => return Err(format!("unsupported system instruction {}", other)),
        };
        if state.contains_key(&address) {
            return Err(format!("account {} already in use", address));
        }
        state.insert(
            address,
            Account {
                lamports,
                owner,
                data: vec![0; space as usize],
                ..Account::default()
            },
        );
        return Ok(());
    }

    if program == spl_token::id() {
        let read_mint = |state: &HashMap<Pubkey, Account>, mint: &Pubkey| {
            state
                .get(mint)
                .and_then(|a| Mint::unpack(&a.data).ok())
                .ok_or_else(|| format!("mint {} missing", mint))
        };
        let write = |state: &mut HashMap<Pubkey, Account>, address: &Pubkey, data: Vec<u8>| {
            if let Some(account) = state.get_mut(address) {
                account.data = data;
            }
        };

        match TokenInstruction::unpack(data).map_err(|e| e.to_string())? {
            TokenInstruction::InitializeMint2 {
                decimals,
                mint_authority,
                freeze_authority,
            } => {
                let mint = key(0)?;
                let account = state.get(&mint).ok_or("mint account missing")?;
                if account.owner != spl_token::id() || account.data.len() != Mint::LEN {
                    return Err("not a mint account".to_string());
                }
                if Mint::unpack_unchecked(&account.data)
                    .map(|m| m.is_initialized)
                    .unwrap_or(false)
                {
                    return Err("mint already initialized".to_string());
                }
                let data = packed(Mint {
                    mint_authority: COption::Some(mint_authority),
                    supply: 0,
                    decimals,
                    is_initialized: true,
                    freeze_authority,
                });
                write(state, &mint, data);
            }
            TokenInstruction::MintTo { amount } => {
                let (mint, destination, authority) = (key(0)?, key(1)?, key(2)?);
                let mut mint_state = read_mint(state, &mint)?;
                if mint_state.mint_authority != COption::Some(authority) || !signed(2) {
                    return Err("mint authority did not sign".to_string());
                }
                let mut holding = state
                    .get(&destination)
                    .and_then(|a| TokenAccount::unpack(&a.data).ok())
                    .ok_or("destination missing")?;
                if holding.mint != mint {
                    return Err("destination belongs to another mint".to_string());
                }
                mint_state.supply += amount;
                holding.amount += amount;
                write(state, &mint, packed(mint_state));
                write(state, &destination, packed(holding));
            }
            TokenInstruction::SetAuthority {
                authority_type: AuthorityType::MintTokens,
                new_authority,
            } => {
                let (mint, authority) = (key(0)?, key(1)?);
                let mut mint_state = read_mint(state, &mint)?;
                if mint_state.mint_authority != COption::Some(authority) || !signed(1) {
                    return Err("mint authority did not sign".to_string());
                }
                mint_state.mint_authority = new_authority;
                write(state, &mint, packed(mint_state));
            }
            other => return Err(format!("unsupported token instruction {:?}", other)),
        }
        return Ok(());
    }

    if program == spl_associated_token_account::id() {
        let (address, wallet, mint) = (key(1)?, key(2)?, key(3)?);
        if data.first() != Some(&1) {
            return Err("only idempotent creation is supported".to_string());
        }
        if state.contains_key(&address) {
            return Ok(());
        }
        state.insert(
            address,
            Account {
                lamports: 2_039_280,
                owner: spl_token::id(),
                data: token_account_data(mint, wallet, 0),
                ..Account::default()
            },
        );
        return Ok(());
    }

    Err(format!("unknown program {}", program))
}

#[async_trait]
impl TokenLedger for InMemoryLedger {
    fn ledger_url(&self) -> &str {
        LEDGER_URL
    }

    async fn account(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.get(address))
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        Ok(self.get(address).map(|a| a.lamports).unwrap_or(0))
    }

    async fn minimum_balance_for_rent_exemption(&self, space: usize) -> Result<u64, RpcError> {
        Ok((space as u64 + 128) * 6960)
    }

    async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        Ok(Hash::default())
    }

    async fn submit(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        tokio::task::yield_now().await;
        let failing = self.failing_submissions.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_submissions.store(failing - 1, Ordering::SeqCst);
            return Err(RpcError::Connect("connection reset".into()));
        }

        let signature = transaction.signatures.first().copied().unwrap_or_default();
        let refused = self.refused_submissions.load(Ordering::SeqCst);
        if refused > 0 {
            self.refused_submissions.store(refused - 1, Ordering::SeqCst);
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(RpcError::TransactionFailed {
                signature: signature.to_string(),
                error: "blockhash not found".into(),
            });
        }
        if let Err(error) = self.execute(transaction) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(RpcError::TransactionFailed {
                signature: signature.to_string(),
                error,
            });
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(signature)
    }

    async fn airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature, RpcError> {
        self.airdrops.fetch_add(1, Ordering::SeqCst);
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(*address).or_default();
        account.lamports += lamports;
        Ok(Signature::default())
    }
}

/// Ledger that refuses connections for a number of calls, then answers
pub struct MockLedgerHealth {
    calls: AtomicU32,
    refuse_first: u32,
}

impl MockLedgerHealth {
    pub fn up() -> Arc<Self> {
        Self::after(0)
    }

    pub fn down() -> Arc<Self> {
        Self::after(u32::MAX)
    }

    pub fn after(refuse_first: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            refuse_first,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerHealth for MockLedgerHealth {
    async fn version(&self) -> Result<NodeVersion, RpcError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.refuse_first {
            return Err(RpcError::Connect("connection refused".into()));
        }
        Ok(NodeVersion {
            core: "1.18.26".into(),
            feature_set: Some(3_469_865_029),
        })
    }
}

/// Platform initializer that fails a number of times, then succeeds
pub struct MockInitializer {
    calls: AtomicU32,
    fail_first: u32,
    failure: BootstrapError,
}

impl MockInitializer {
    pub fn ok() -> Arc<Self> {
        Self::after(0)
    }

    pub fn after(fail_first: u32) -> Arc<Self> {
        Self::failing_with(
            fail_first,
            BootstrapError::Initialization {
                reason: "exit status: 1".into(),
            },
        )
    }

    pub fn failing_with(fail_first: u32, failure: BootstrapError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_first,
            failure,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformInitializer for MockInitializer {
    async fn initialize(&self, _ledger: &ServiceEndpoint) -> Result<(), BootstrapError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(self.failure.clone());
        }
        Ok(())
    }
}

pub fn paused_clock() -> Arc<dyn Clock> {
    Arc::new(PausedClock::new())
}

pub fn check(max_attempts: u32) -> ReadinessCheck {
    ReadinessCheck::once(endpoint(), Duration::from_secs(1)).with_max_attempts(max_attempts)
}

pub fn ledger_gate(health: Arc<MockLedgerHealth>, max_attempts: u32) -> LedgerReadinessGate {
    LedgerReadinessGate::new(
        ReadinessProbe::new(paused_clock()),
        health,
        check(max_attempts),
    )
}

pub fn platform_gate(
    initializer: Arc<MockInitializer>,
    max_attempts: u32,
) -> PlatformReadinessGate {
    PlatformReadinessGate::new(
        ReadinessProbe::new(paused_clock()),
        initializer,
        check(max_attempts),
    )
}

/// Witness for tests that start at provisioning; needs a paused runtime
pub async fn platform_ready() -> PlatformReady {
    let ledger = ledger_gate(MockLedgerHealth::up(), 1).wait().await.unwrap();
    platform_gate(MockInitializer::ok(), 1)
        .wait(&ledger)
        .await
        .unwrap()
}
