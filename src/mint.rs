//! Minting from a deployed candy machine
//!
//! A mint runs in three transactions:
//!
//! 1. approve: give single-use delegates the right to burn one whitelist
//!    token and to move the price in the payment token
//! 2. mint: create the token mint and call the candy machine
//! 3. revoke: remove the delegates again
//!
//! Revoke runs whenever approve committed, even if the mint failed. A
//! delegate left behind by an interrupted run is revoked before the next
//! approval.

use crate::cache::{CacheFile, ProgramInfo};
use crate::chain::{AccountOwner, Address, Instruction, TransactionSubmitter, TxId};
use crate::config::deployment::WhitelistMode;
use crate::error::{DeployError, DeployResult};
use crate::wallet::{KeySource, Signer};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Size of a token mint account
pub const MINT_ACCOUNT_SIZE: usize = 82;

/// One minted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub mint: Address,
    /// `None` when the mint account exists but its transaction was never
    /// seen confirmed
    pub txid: Option<TxId>,
}

/// Delegations made in the approve phase
#[derive(Default)]
struct Allowances {
    instructions: Vec<Instruction>,
    revokes: Vec<Instruction>,
    whitelist_delegate: Option<Arc<dyn Signer>>,
    payment_delegate: Option<Arc<dyn Signer>>,
}

impl Allowances {
    /// Revoke a leftover delegate, then approve a fresh one for `amount`
    fn delegate(
        &mut self,
        keys: &dyn KeySource,
        owner: &Address,
        mint: &Address,
        stale: bool,
        amount: u64,
    ) -> Arc<dyn Signer> {
        if stale {
            debug!("Revoking stale delegate on {} token account", mint);
            self.instructions.push(Instruction::Revoke {
                owner: owner.clone(),
                mint: mint.clone(),
            });
        }
        let delegate = keys.generate();
        self.instructions.push(Instruction::Approve {
            owner: owner.clone(),
            mint: mint.clone(),
            delegate: delegate.address(),
            amount,
        });
        self.revokes.push(Instruction::Revoke {
            owner: owner.clone(),
            mint: mint.clone(),
        });
        delegate
    }
}

/// Mints tokens from the candy machine recorded in a cache
pub struct Minter {
    submitter: TransactionSubmitter,
    keys: Arc<dyn KeySource>,
    cache: CacheFile,
}

impl Minter {
    pub fn new(submitter: TransactionSubmitter, keys: Arc<dyn KeySource>, cache: CacheFile) -> Self {
        Self {
            submitter,
            keys,
            cache,
        }
    }

    /// Mint one token
    pub async fn mint_one(&self) -> DeployResult<MintReceipt> {
        let cache = self.cache.load().await?;
        self.mint_from(&cache.program).await
    }

    /// Mint `count` tokens, stopping at the first failure
    pub async fn mint_many(&self, count: u32) -> DeployResult<Vec<MintReceipt>> {
        let cache = self.cache.load().await?;
        let mut receipts = Vec::with_capacity(count as usize);

        for n in 0..count {
            match self.mint_from(&cache.program).await {
                Ok(receipt) => {
                    info!("Minted {} ({}/{})", receipt.mint, n + 1, count);
                    receipts.push(receipt);
                }
                Err(e) => {
                    return Err(DeployError::MintIncomplete {
                        minted: n,
                        requested: count,
                        source: Box::new(e),
                    })
                }
            }
        }
        Ok(receipts)
    }

    async fn mint_from(&self, program: &ProgramInfo) -> DeployResult<MintReceipt> {
        let candy_machine = program.candy_machine.clone().ok_or_else(|| {
            DeployError::config("cache has no candy machine; run the upload first")
        })?;
        let payer = self.keys.payer();
        let owner = payer.address();

        let allowances = self.plan_allowances(program, &owner).await?;
        let approved = self
            .submitter
            .submit(allowances.instructions.clone(), &[payer.clone()])
            .await?;

        let minted = self
            .mint_token(&candy_machine, payer.clone(), &allowances)
            .await;

        if approved.is_some() {
            if let Err(e) = self
                .submitter
                .submit(allowances.revokes, &[payer])
                .await
            {
                warn!("Revoking mint delegates failed, the next mint will retry: {}", e);
            }
        }
        minted
    }

    async fn plan_allowances(&self, program: &ProgramInfo, owner: &Address) -> DeployResult<Allowances> {
        let chain = self.submitter.chain();
        let mut allowances = Allowances::default();

        if let Some(whitelist) = &program.whitelist {
            if whitelist.mode == WhitelistMode::BurnEveryTime {
                match chain.get_token_account(owner, &whitelist.mint).await? {
                    Some(account) if account.amount > 0 => {
                        let delegate = allowances.delegate(
                            self.keys.as_ref(),
                            owner,
                            &whitelist.mint,
                            account.delegate.is_some(),
                            1,
                        );
                        allowances.whitelist_delegate = Some(delegate);
                    }
                    _ => debug!("No whitelist token held; minting at the public price"),
                }
            }
        }

        if let Some(token_mint) = &program.token_mint {
            let account = chain
                .get_token_account(owner, token_mint)
                .await?
                .ok_or_else(|| {
                    DeployError::config(format!(
                        "wallet {} has no token account for payment mint {}",
                        owner, token_mint
                    ))
                })?;
            let delegate = allowances.delegate(
                self.keys.as_ref(),
                owner,
                token_mint,
                account.delegate.is_some(),
                program.price,
            );
            allowances.payment_delegate = Some(delegate);
        }

        Ok(allowances)
    }

    async fn mint_token(
        &self,
        candy_machine: &Address,
        payer: Arc<dyn Signer>,
        allowances: &Allowances,
    ) -> DeployResult<MintReceipt> {
        let mint = self.keys.generate();
        let lamports = self
            .submitter
            .chain()
            .get_minimum_rent_exempt_balance(MINT_ACCOUNT_SIZE)
            .await?;

        let instructions = vec![
            Instruction::CreateAccount {
                payer: payer.address(),
                new_account: mint.address(),
                lamports,
                space: MINT_ACCOUNT_SIZE as u64,
                owner: AccountOwner::Token,
            },
            Instruction::InitializeMint {
                mint: mint.address(),
                authority: payer.address(),
                decimals: 0,
            },
            Instruction::CreateAssociatedTokenAccount {
                payer: payer.address(),
                owner: payer.address(),
                mint: mint.address(),
            },
            Instruction::MintTo {
                mint: mint.address(),
                owner: payer.address(),
                authority: payer.address(),
                amount: 1,
            },
            Instruction::MintNft {
                candy_machine: candy_machine.clone(),
                payer: payer.address(),
                mint: mint.address(),
                whitelist_burn_authority: allowances.whitelist_delegate.as_ref().map(|d| d.address()),
                payment_authority: allowances.payment_delegate.as_ref().map(|d| d.address()),
            },
        ];

        let mut signers = vec![payer, mint.clone()];
        signers.extend(allowances.whitelist_delegate.iter().cloned());
        signers.extend(allowances.payment_delegate.iter().cloned());

        let txid = match self.submitter.submit(instructions, &signers).await {
            Ok(txid) => txid,
            Err(e) => {
                // the mint account only exists if the whole transaction landed
                match self.submitter.chain().get_account_bytes(&mint.address()).await {
                    Ok(Some(_)) => {
                        warn!("Mint {} landed without a confirmation: {}", mint.address(), e);
                        None
                    }
                    _ => return Err(e),
                }
            }
        };
        Ok(MintReceipt {
            mint: mint.address(),
            txid,
        })
    }
}
