//! Chain access
//!
//! [`ChainClient`] is the narrow interface to the cluster. Two clients ship
//! with the crate:
//! - [`RpcChainClient`]: JSON-RPC over HTTP
//! - [`MemoryChain`]: in-process ledger with the real account layout

pub mod memory;
pub mod rpc;
pub mod submitter;
mod types;

pub use memory::MemoryChain;
pub use rpc::{RpcChainClient, TransactionEncoder};
pub use submitter::TransactionSubmitter;
pub use types::{
    AccountOwner, Address, Blockhash, CandyMachineData, Creator, Instruction, SignatureStatus,
    TokenAccount, Transaction, TxId, TxSignature,
};

use crate::error::DeployResult;
use async_trait::async_trait;

/// Abstract cluster interface
///
/// Every call is a suspension point; implementations must return rather than
/// block indefinitely.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Raw data of an account, `None` if it does not exist
    async fn get_account_bytes(&self, address: &Address) -> DeployResult<Option<Vec<u8>>>;

    /// A blockhash recent enough to anchor a new transaction
    async fn get_recent_blockhash(&self) -> DeployResult<Blockhash>;

    /// Send a signed transaction, returning its id without waiting
    async fn submit_transaction(&self, tx: &Transaction) -> DeployResult<TxId>;

    /// Current confirmation state of a submitted transaction
    async fn get_signature_status(&self, txid: &TxId) -> DeployResult<SignatureStatus>;

    /// Lamports needed for an account of `size` bytes to be rent exempt
    async fn get_minimum_rent_exempt_balance(&self, size: usize) -> DeployResult<u64>;

    /// The owner's token account for `mint`, if any
    async fn get_token_account(
        &self,
        owner: &Address,
        mint: &Address,
    ) -> DeployResult<Option<TokenAccount>>;

    /// Human-readable endpoint name for logs
    fn endpoint(&self) -> &str;
}
