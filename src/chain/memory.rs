//! In-process chain
//!
//! Applies transactions to an account map using the real candy machine byte
//! layout, so the verifier reads exactly what it would read from a cluster.
//! Used by tests and dry runs; failure injection hooks let tests simulate a
//! flaky RPC node, dropped transactions and program rejections.

use super::{
    Address, Blockhash, CandyMachineData, ChainClient, Instruction,
    SignatureStatus, TokenAccount, Transaction, TxId,
};
use crate::config::deployment::WhitelistMode;
use crate::error::{DeployError, DeployResult};
use crate::ledger::{self, ConfigLine};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lamports per byte-year, as charged by the cluster
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
/// Rent exemption covers two years
const EXEMPTION_YEARS: u64 = 2;
/// Per-account overhead counted for rent
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

type RejectFn = dyn Fn(&Transaction) -> Option<String> + Send + Sync;

#[derive(Debug, Clone)]
struct CandyMachineState {
    authority: Address,
    wallet: Address,
    token_mint: Option<Address>,
    data: CandyMachineData,
    redeemed: u32,
}

#[derive(Debug, Clone)]
struct MintState {
    authority: Address,
    supply: u64,
}

#[derive(Debug, Clone)]
struct TokenState {
    address: Address,
    amount: u64,
    delegate: Option<(Address, u64)>,
}

impl TokenState {
    fn view(&self) -> TokenAccount {
        TokenAccount {
            address: self.address.clone(),
            amount: self.amount,
            delegate: self.delegate.as_ref().map(|(d, _)| d.clone()),
        }
    }

    /// Move `amount` out through the approved delegate
    fn spend_delegated(&mut self, delegate: &Address, amount: u64) -> Result<(), String> {
        match &mut self.delegate {
            Some((approved, allowance)) if approved == delegate && *allowance >= amount => {
                if self.amount < amount {
                    return Err("insufficient token balance".to_string());
                }
                *allowance -= amount;
                self.amount -= amount;
                Ok(())
            }
            _ => Err(format!("{} is not an approved delegate", delegate)),
        }
    }
}

/// Ledger state; cloned for each transaction so failures leave no trace
#[derive(Debug, Clone, Default)]
struct Ledger {
    accounts: HashMap<Address, Vec<u8>>,
    candy_machines: HashMap<Address, CandyMachineState>,
    mints: HashMap<Address, MintState>,
    token_accounts: HashMap<(Address, Address), TokenState>,
    lamports: HashMap<Address, u64>,
    minted: Vec<Address>,
}

#[derive(Default)]
struct State {
    ledger: Ledger,
    statuses: HashMap<TxId, SignatureStatus>,
    blockhashes: Vec<Blockhash>,
    committed: Vec<Transaction>,
    fail_submissions: u32,
    drop_confirmations: u32,
    /// (transactions left to hide, status queries each stays hidden for)
    hide_confirmations: (u32, u32),
    hidden: HashMap<TxId, u32>,
    reject: Option<Box<RejectFn>>,
}

/// In-process [`ChainClient`]
#[derive(Default)]
pub struct MemoryChain {
    state: Mutex<State>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw data of an account
    pub fn account_data(&self, address: &Address) -> Option<Vec<u8>> {
        self.lock().ledger.accounts.get(address).cloned()
    }

    /// Replace the data of an account, creating it if needed
    pub fn set_account_data(&self, address: &Address, data: Vec<u8>) {
        self.lock().ledger.accounts.insert(address.clone(), data);
    }

    /// Overwrite the config line at `index` behind the program's back
    pub fn corrupt_line(&self, candy_machine: &Address, index: u32, line: &ConfigLine) -> DeployResult<()> {
        let mut state = self.lock();
        let data = state
            .ledger
            .accounts
            .get_mut(candy_machine)
            .ok_or_else(|| DeployError::AccountNotFound(candy_machine.to_string()))?;
        ledger::write_line(data, index, line)
    }

    /// Number of transactions applied so far
    pub fn committed_count(&self) -> usize {
        self.lock().committed.len()
    }

    pub fn committed_transactions(&self) -> Vec<Transaction> {
        self.lock().committed.clone()
    }

    /// Number of blockhashes handed out
    pub fn blockhashes_issued(&self) -> usize {
        self.lock().blockhashes.len()
    }

    /// Fail the next `n` submissions with a transient RPC error
    pub fn fail_next_submissions(&self, n: u32) {
        self.lock().fail_submissions = n;
    }

    /// Accept the next `n` submissions but never confirm them
    pub fn drop_next_confirmations(&self, n: u32) {
        self.lock().drop_confirmations = n;
    }

    /// Apply the next `n` submissions but report them as pending for their
    /// first `polls` status queries; `u32::MAX` hides them for good
    pub fn hide_next_confirmations(&self, n: u32, polls: u32) {
        self.lock().hide_confirmations = (n, polls);
    }

    /// Mark matching transactions as failed by the program
    pub fn reject_when<F>(&self, predicate: F)
    where
        F: Fn(&Transaction) -> Option<String> + Send + Sync + 'static,
    {
        self.lock().reject = Some(Box::new(predicate));
    }

    pub fn clear_rejections(&self) {
        self.lock().reject = None;
    }

    /// Give `owner` a token account for `mint` holding `amount`
    pub fn fund_token_account(&self, owner: &Address, mint: &Address, amount: u64) {
        let mut state = self.lock();
        let entry = state
            .ledger
            .token_accounts
            .entry((owner.clone(), mint.clone()))
            .or_insert_with(|| TokenState {
                address: token_account_address(owner, mint),
                amount: 0,
                delegate: None,
            });
        entry.amount += amount;
    }

    /// Leave a delegate on a token account, as an interrupted mint would
    pub fn set_delegate(&self, owner: &Address, mint: &Address, delegate: &Address, amount: u64) {
        if let Some(account) = self
            .lock()
            .ledger
            .token_accounts
            .get_mut(&(owner.clone(), mint.clone()))
        {
            account.delegate = Some((delegate.clone(), amount));
        }
    }

    pub fn token_account(&self, owner: &Address, mint: &Address) -> Option<TokenAccount> {
        self.lock()
            .ledger
            .token_accounts
            .get(&(owner.clone(), mint.clone()))
            .map(TokenState::view)
    }

    /// Settings the candy machine was initialized with
    pub fn candy_machine(&self, address: &Address) -> Option<CandyMachineData> {
        self.lock()
            .ledger
            .candy_machines
            .get(address)
            .map(|cm| cm.data.clone())
    }

    /// Mints produced by the candy machine mint instruction, in order
    pub fn minted(&self) -> Vec<Address> {
        self.lock().ledger.minted.clone()
    }

    /// Lamports credited to `address` by mint payments
    pub fn lamports(&self, address: &Address) -> u64 {
        self.lock()
            .ledger
            .lamports
            .get(address)
            .copied()
            .unwrap_or_default()
    }
}

fn rent_exempt_minimum(size: usize) -> u64 {
    (size as u64 + ACCOUNT_STORAGE_OVERHEAD) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_YEARS
}

fn token_account_address(owner: &Address, mint: &Address) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_str());
    hasher.update(mint.as_str());
    Address::new(hex::encode(&hasher.finalize()[..20]))
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn get_account_bytes(&self, address: &Address) -> DeployResult<Option<Vec<u8>>> {
        Ok(self.account_data(address))
    }

    async fn get_recent_blockhash(&self) -> DeployResult<Blockhash> {
        let mut state = self.lock();
        let hash = Blockhash(format!("blockhash-{}", state.blockhashes.len() + 1));
        state.blockhashes.push(hash.clone());
        Ok(hash)
    }

    async fn submit_transaction(&self, tx: &Transaction) -> DeployResult<TxId> {
        let mut state = self.lock();
        if state.fail_submissions > 0 {
            state.fail_submissions -= 1;
            return Err(DeployError::rpc("connection reset by peer"));
        }

        let txid = tx
            .id()
            .ok_or_else(|| DeployError::TransactionRejected("transaction is not signed".into()))?;
        if !state.blockhashes.contains(&tx.recent_blockhash) {
            return Err(DeployError::TransactionRejected("blockhash not found".into()));
        }
        if state.statuses.contains_key(&txid) {
            return Ok(txid);
        }

        if state.drop_confirmations > 0 {
            state.drop_confirmations -= 1;
            state.statuses.insert(txid.clone(), SignatureStatus::Pending);
            return Ok(txid);
        }

        let rejected = state.reject.as_ref().and_then(|reject| reject(tx));
        let outcome = match rejected {
            Some(reason) => Err(reason),
            None => {
                let mut next = state.ledger.clone();
                next.apply(tx).map(|()| next)
            }
        };

        let status = match outcome {
            Ok(next) => {
                state.ledger = next;
                state.committed.push(tx.clone());
                SignatureStatus::Confirmed
            }
            Err(reason) => SignatureStatus::Failed(reason),
        };
        state.statuses.insert(txid.clone(), status);
        let (left, polls) = state.hide_confirmations;
        if left > 0 {
            state.hide_confirmations = (left - 1, polls);
            state.hidden.insert(txid.clone(), polls);
        }
        Ok(txid)
    }

    async fn get_signature_status(&self, txid: &TxId) -> DeployResult<SignatureStatus> {
        let mut state = self.lock();
        if let Some(polls) = state.hidden.get_mut(txid) {
            if *polls > 0 {
                if *polls != u32::MAX {
                    *polls -= 1;
                }
                return Ok(SignatureStatus::Pending);
            }
        }
        Ok(state
            .statuses
            .get(txid)
            .cloned()
            .unwrap_or(SignatureStatus::Pending))
    }

    async fn get_minimum_rent_exempt_balance(&self, size: usize) -> DeployResult<u64> {
        Ok(rent_exempt_minimum(size))
    }

    async fn get_token_account(
        &self,
        owner: &Address,
        mint: &Address,
    ) -> DeployResult<Option<TokenAccount>> {
        Ok(self.token_account(owner, mint))
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

impl Ledger {
    fn apply(&mut self, tx: &Transaction) -> Result<(), String> {
        for (position, instruction) in tx.instructions.iter().enumerate() {
            self.apply_instruction(tx, instruction)
                .map_err(|e| format!("instruction {}: {}", position, e))?;
        }
        Ok(())
    }

    fn apply_instruction(&mut self, tx: &Transaction, instruction: &Instruction) -> Result<(), String> {
        match instruction {
            Instruction::CreateAccount {
                payer,
                new_account,
                lamports,
                space,
                owner: _,
            } => {
                require_signer(tx, payer)?;
                require_signer(tx, new_account)?;
                if self.accounts.contains_key(new_account) {
                    return Err(format!("account {} already in use", new_account));
                }
                let space = *space as usize;
                if *lamports < rent_exempt_minimum(space) {
                    return Err("insufficient funds for rent".to_string());
                }
                self.accounts.insert(new_account.clone(), vec![0u8; space]);
                Ok(())
            }

            Instruction::InitializeCandyMachine {
                candy_machine,
                authority,
                wallet,
                token_mint,
                data,
            } => {
                require_signer(tx, authority)?;
                let account = self
                    .accounts
                    .get(candy_machine)
                    .ok_or_else(|| format!("account {} does not exist", candy_machine))?;
                let needed = ledger::account_size(data.items_available, data.hidden_settings.is_some());
                if account.len() < needed {
                    return Err(format!(
                        "account too small: {} bytes, need {}",
                        account.len(),
                        needed
                    ));
                }
                if self.candy_machines.contains_key(candy_machine) {
                    return Err("candy machine already initialized".to_string());
                }
                self.candy_machines.insert(
                    candy_machine.clone(),
                    CandyMachineState {
                        authority: authority.clone(),
                        wallet: wallet.clone(),
                        token_mint: token_mint.clone(),
                        data: (**data).clone(),
                        redeemed: 0,
                    },
                );
                Ok(())
            }

            Instruction::AddConfigLines {
                candy_machine,
                authority,
                index,
                lines,
            } => {
                require_signer(tx, authority)?;
                let cm = self
                    .candy_machines
                    .get(candy_machine)
                    .ok_or_else(|| format!("{} is not a candy machine", candy_machine))?;
                if &cm.authority != authority {
                    return Err("authority mismatch".to_string());
                }
                if cm.data.hidden_settings.is_some() {
                    return Err("hidden settings machines take no config lines".to_string());
                }
                let end = index
                    .checked_add(lines.len() as u32)
                    .filter(|end| *end <= cm.data.items_available)
                    .ok_or_else(|| format!("index {} out of range", index))?;

                let data = self
                    .accounts
                    .get_mut(candy_machine)
                    .ok_or_else(|| format!("account {} does not exist", candy_machine))?;
                for (offset, line) in lines.iter().enumerate() {
                    ledger::write_line(data, index + offset as u32, line).map_err(|e| e.to_string())?;
                }
                let count = ledger::line_count(data).map_err(|e| e.to_string())?;
                ledger::set_line_count(data, count.max(end)).map_err(|e| e.to_string())?;
                Ok(())
            }

            Instruction::InitializeMint {
                mint,
                authority,
                decimals: _,
            } => {
                if !self.accounts.contains_key(mint) {
                    return Err(format!("account {} does not exist", mint));
                }
                if self.mints.contains_key(mint) {
                    return Err("mint already initialized".to_string());
                }
                self.mints.insert(
                    mint.clone(),
                    MintState {
                        authority: authority.clone(),
                        supply: 0,
                    },
                );
                Ok(())
            }

            Instruction::CreateAssociatedTokenAccount { payer, owner, mint } => {
                require_signer(tx, payer)?;
                if !self.mints.contains_key(mint) {
                    return Err(format!("{} is not a mint", mint));
                }
                let key = (owner.clone(), mint.clone());
                if self.token_accounts.contains_key(&key) {
                    return Err("token account already exists".to_string());
                }
                self.token_accounts.insert(
                    key,
                    TokenState {
                        address: token_account_address(owner, mint),
                        amount: 0,
                        delegate: None,
                    },
                );
                Ok(())
            }

            Instruction::MintTo {
                mint,
                owner,
                authority,
                amount,
            } => {
                require_signer(tx, authority)?;
                let state = self
                    .mints
                    .get_mut(mint)
                    .ok_or_else(|| format!("{} is not a mint", mint))?;
                if &state.authority != authority {
                    return Err("mint authority mismatch".to_string());
                }
                let account = self
                    .token_accounts
                    .get_mut(&(owner.clone(), mint.clone()))
                    .ok_or_else(|| "token account does not exist".to_string())?;
                state.supply += amount;
                account.amount += amount;
                Ok(())
            }

            Instruction::Approve {
                owner,
                mint,
                delegate,
                amount,
            } => {
                require_signer(tx, owner)?;
                let account = self
                    .token_accounts
                    .get_mut(&(owner.clone(), mint.clone()))
                    .ok_or_else(|| "token account does not exist".to_string())?;
                account.delegate = Some((delegate.clone(), *amount));
                Ok(())
            }

            Instruction::Revoke { owner, mint } => {
                require_signer(tx, owner)?;
                let account = self
                    .token_accounts
                    .get_mut(&(owner.clone(), mint.clone()))
                    .ok_or_else(|| "token account does not exist".to_string())?;
                account.delegate = None;
                Ok(())
            }

            Instruction::MintNft {
                candy_machine,
                payer,
                mint,
                whitelist_burn_authority,
                payment_authority,
            } => {
                require_signer(tx, payer)?;
                self.mint_nft(
                    tx,
                    candy_machine,
                    payer,
                    mint,
                    whitelist_burn_authority.as_ref(),
                    payment_authority.as_ref(),
                )
            }
        }
    }

    fn mint_nft(
        &mut self,
        tx: &Transaction,
        candy_machine: &Address,
        payer: &Address,
        mint: &Address,
        whitelist_burn_authority: Option<&Address>,
        payment_authority: Option<&Address>,
    ) -> Result<(), String> {
        let cm = self
            .candy_machines
            .get(candy_machine)
            .cloned()
            .ok_or_else(|| format!("{} is not a candy machine", candy_machine))?;
        if cm.redeemed >= cm.data.items_available {
            return Err("candy machine is empty".to_string());
        }
        match self.mints.get(mint) {
            Some(state) if state.supply == 1 => {}
            _ => return Err(format!("{} is not a freshly minted token", mint)),
        }

        let mut whitelisted = false;
        if let Some(whitelist) = &cm.data.whitelist_mint_settings {
            let key = (payer.clone(), Address::new(whitelist.mint.clone()));
            let holds_token = self
                .token_accounts
                .get(&key)
                .is_some_and(|account| account.amount > 0);

            if holds_token {
                whitelisted = true;
                if whitelist.mode == WhitelistMode::BurnEveryTime {
                    let delegate = whitelist_burn_authority
                        .ok_or_else(|| "whitelist burn authority missing".to_string())?;
                    require_signer(tx, delegate)?;
                    if let Some(account) = self.token_accounts.get_mut(&key) {
                        account.spend_delegated(delegate, 1)?;
                    }
                }
            } else if whitelist.presale {
                return Err("minting is limited to whitelisted wallets".to_string());
            }
        }

        if !whitelisted {
            if let Some(go_live) = cm.data.go_live_date {
                if go_live > chrono::Utc::now().timestamp() {
                    return Err("candy machine is not live yet".to_string());
                }
            }
        }

        match &cm.token_mint {
            Some(token_mint) => {
                let delegate =
                    payment_authority.ok_or_else(|| "payment authority missing".to_string())?;
                require_signer(tx, delegate)?;
                let account = self
                    .token_accounts
                    .get_mut(&(payer.clone(), token_mint.clone()))
                    .ok_or_else(|| "payment token account does not exist".to_string())?;
                account.spend_delegated(delegate, cm.data.price)?;
            }
            None => {
                *self.lamports.entry(cm.wallet.clone()).or_default() += cm.data.price;
            }
        }

        if let Some(state) = self.candy_machines.get_mut(candy_machine) {
            state.redeemed += 1;
        }
        self.minted.push(mint.clone());
        Ok(())
    }
}

fn require_signer(tx: &Transaction, address: &Address) -> Result<(), String> {
    if tx.is_signed_by(address) {
        Ok(())
    } else {
        Err(format!("missing signature for {}", address))
    }
}

impl std::fmt::Debug for MemoryChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryChain")
            .field("accounts", &state.ledger.accounts.len())
            .field("committed", &state.committed.len())
            .finish()
    }
}
