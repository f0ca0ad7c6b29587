//! Transaction submission with confirmation and bounded resubmission

use super::{ChainClient, Instruction, SignatureStatus, Transaction, TxId};
use crate::config::schema::SubmitConfig;
use crate::error::{DeployError, DeployResult};
use crate::retry::{with_retry, RetryPolicy};
use crate::wallet::Signer;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Signs, sends and confirms transactions
///
/// Each attempt fetches a fresh blockhash, so a resubmission after a
/// confirmation timeout is a new transaction. Before resubmitting, and when
/// a resubmission is rejected, the transactions sent earlier are checked
/// again; if one of them landed its id is returned instead. A transaction
/// whose confirmation never shows up can still be applied twice, so callers
/// creating accounts check for the account when submission fails.
#[derive(Clone)]
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    config: SubmitConfig,
}

impl TransactionSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, config: SubmitConfig) -> Self {
        Self { chain, config }
    }

    /// The client used for submission and status queries
    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Submit `instructions` signed by `signers`; the first signer pays.
    ///
    /// Returns `Ok(None)` without touching the network when there is nothing
    /// to send.
    pub async fn submit(
        &self,
        instructions: Vec<Instruction>,
        signers: &[Arc<dyn Signer>],
    ) -> DeployResult<Option<TxId>> {
        if instructions.is_empty() {
            return Ok(None);
        }

        let policy = RetryPolicy::from(&self.config);
        let pending = instructions.as_slice();
        let sent = Mutex::new(Vec::new());
        let result = with_retry(&policy, "submit_transaction", || {
            self.attempt(pending, signers, &sent)
        })
        .await;

        match result {
            Ok(txid) => {
                info!(txid = %txid, instructions = instructions.len(), "Transaction confirmed");
                Ok(Some(txid))
            }
            Err(exhausted) => {
                warn!(
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "Transaction submission failed"
                );
                Err(DeployError::SubmissionFailed {
                    attempts: exhausted.attempts,
                    source: Box::new(exhausted.last),
                })
            }
        }
    }

    async fn attempt(
        &self,
        instructions: &[Instruction],
        signers: &[Arc<dyn Signer>],
        sent: &Mutex<Vec<TxId>>,
    ) -> DeployResult<TxId> {
        if let Some(txid) = self.landed_earlier(sent).await? {
            return Ok(txid);
        }

        let blockhash = self.chain.get_recent_blockhash().await?;
        let tx = Transaction::signed(blockhash.clone(), instructions.to_vec(), signers)?;
        let txid = self.chain.submit_transaction(&tx).await?;
        debug!(txid = %txid, blockhash = %blockhash.0, "Transaction sent");

        match self.await_confirmation(&txid).await {
            Ok(()) => Ok(txid),
            Err(e @ DeployError::TransactionRejected(_)) => match self.landed_earlier(sent).await {
                Ok(Some(earlier)) => Ok(earlier),
                _ => Err(e),
            },
            Err(e) => {
                sent.lock().unwrap_or_else(PoisonError::into_inner).push(txid);
                Err(e)
            }
        }
    }

    /// First earlier transaction of this submission that has since confirmed
    async fn landed_earlier(&self, sent: &Mutex<Vec<TxId>>) -> DeployResult<Option<TxId>> {
        let earlier = sent.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for txid in earlier {
            if self.chain.get_signature_status(&txid).await? == SignatureStatus::Confirmed {
                info!(txid = %txid, "Earlier transaction confirmed late");
                return Ok(Some(txid));
            }
        }
        Ok(None)
    }

    async fn await_confirmation(&self, txid: &TxId) -> DeployResult<()> {
        let timeout = self.config.confirm_timeout();
        let poll = async {
            loop {
                match self.chain.get_signature_status(txid).await? {
                    SignatureStatus::Confirmed => return Ok(()),
                    SignatureStatus::Failed(reason) => {
                        return Err(DeployError::TransactionRejected(reason))
                    }
                    SignatureStatus::Pending => {
                        tokio::time::sleep(self.config.poll_interval()).await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(DeployError::ConfirmationTimeout {
                txid: txid.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

impl std::fmt::Debug for TransactionSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSubmitter")
            .field("endpoint", &self.chain.endpoint())
            .field("config", &self.config)
            .finish()
    }
}
