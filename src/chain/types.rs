//! Chain-facing value types
//!
//! Instructions are described by intent; turning them into the on-chain
//! program's wire format is the job of a [`TransactionEncoder`](super::TransactionEncoder).

use crate::config::deployment::{
    EndSettings, GatekeeperConfig, HiddenSettings, WhitelistMintSettings,
};
use crate::error::{DeployError, DeployResult};
use crate::ledger::ConfigLine;
use crate::wallet::Signer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Account address, kept in its textual form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(DeployError::config(format!("invalid address: {:?}", s)));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Recent blockhash a transaction is anchored to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blockhash(pub String);

/// Transaction identifier (its first signature)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Confirmation state of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not seen yet, or seen but not confirmed
    Pending,
    Confirmed,
    /// Landed and failed; carries the program error
    Failed(String),
}

/// Token balance held by `owner` for one mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccount {
    pub address: Address,
    pub amount: u64,
    pub delegate: Option<Address>,
}

/// Program that owns a newly created account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountOwner {
    CandyMachine,
    Token,
}

/// Royalty recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub address: Address,
    pub verified: bool,
    pub share: u8,
}

/// Settings written when the candy machine is initialized
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandyMachineData {
    pub uuid: String,
    pub price: u64,
    pub items_available: u32,
    pub symbol: String,
    pub seller_fee_basis_points: u16,
    pub max_supply: u64,
    pub is_mutable: bool,
    pub retain_authority: bool,
    pub go_live_date: Option<i64>,
    pub creators: Vec<Creator>,
    pub end_settings: Option<EndSettings>,
    pub hidden_settings: Option<HiddenSettings>,
    pub whitelist_mint_settings: Option<WhitelistMintSettings>,
    pub gatekeeper: Option<GatekeeperConfig>,
}

/// One operation inside a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Instruction {
    #[serde(rename_all = "camelCase")]
    CreateAccount {
        payer: Address,
        new_account: Address,
        lamports: u64,
        space: u64,
        owner: AccountOwner,
    },
    #[serde(rename_all = "camelCase")]
    InitializeCandyMachine {
        candy_machine: Address,
        authority: Address,
        wallet: Address,
        token_mint: Option<Address>,
        data: Box<CandyMachineData>,
    },
    #[serde(rename_all = "camelCase")]
    AddConfigLines {
        candy_machine: Address,
        authority: Address,
        index: u32,
        lines: Vec<ConfigLine>,
    },
    InitializeMint {
        mint: Address,
        authority: Address,
        decimals: u8,
    },
    CreateAssociatedTokenAccount {
        payer: Address,
        owner: Address,
        mint: Address,
    },
    MintTo {
        mint: Address,
        owner: Address,
        authority: Address,
        amount: u64,
    },
    /// Let `delegate` move `amount` from the owner's token account for `mint`
    Approve {
        owner: Address,
        mint: Address,
        delegate: Address,
        amount: u64,
    },
    Revoke {
        owner: Address,
        mint: Address,
    },
    #[serde(rename_all = "camelCase")]
    MintNft {
        candy_machine: Address,
        payer: Address,
        mint: Address,
        whitelist_burn_authority: Option<Address>,
        payment_authority: Option<Address>,
    },
}

/// Signature of one signer over the transaction message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub signer: Address,
    /// Hex-encoded signature bytes
    pub signature: String,
}

/// A signed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub fee_payer: Address,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<Instruction>,
    pub signatures: Vec<TxSignature>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Message<'a> {
    fee_payer: &'a Address,
    recent_blockhash: &'a Blockhash,
    instructions: &'a [Instruction],
}

impl Transaction {
    /// Build a transaction paid by the first signer and sign it with all of them
    pub fn signed(
        recent_blockhash: Blockhash,
        instructions: Vec<Instruction>,
        signers: &[Arc<dyn Signer>],
    ) -> DeployResult<Self> {
        let payer = signers
            .first()
            .ok_or_else(|| DeployError::config("a transaction needs at least one signer"))?;

        let mut tx = Self {
            fee_payer: payer.address(),
            recent_blockhash,
            instructions,
            signatures: Vec::with_capacity(signers.len()),
        };

        let message = tx.message()?;
        for signer in signers {
            tx.signatures.push(TxSignature {
                signer: signer.address(),
                signature: hex::encode(signer.sign(&message)?),
            });
        }
        Ok(tx)
    }

    /// Bytes covered by the signatures
    pub fn message(&self) -> DeployResult<Vec<u8>> {
        Ok(serde_json::to_vec(&Message {
            fee_payer: &self.fee_payer,
            recent_blockhash: &self.recent_blockhash,
            instructions: &self.instructions,
        })?)
    }

    /// Identifier of the transaction, once signed
    pub fn id(&self) -> Option<TxId> {
        self.signatures
            .first()
            .map(|s| TxId(s.signature.clone()))
    }

    pub fn is_signed_by(&self, address: &Address) -> bool {
        self.signatures.iter().any(|s| &s.signer == address)
    }
}
