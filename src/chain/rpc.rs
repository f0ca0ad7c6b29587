//! JSON-RPC chain client
//!
//! Speaks the Solana JSON-RPC dialect over HTTP. Requests are blocking
//! `ureq` calls moved onto tokio's blocking pool. Turning a [`Transaction`]
//! into program wire bytes needs the program's instruction encoding, which
//! is supplied through [`TransactionEncoder`]; a client built without one
//! can read the chain but not submit.

use super::{Address, Blockhash, ChainClient, SignatureStatus, TokenAccount, Transaction, TxId};
use crate::error::{DeployError, DeployResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Server is temporarily unable to serve the slot
const BLOCK_NOT_AVAILABLE: i64 = -32004;
/// Node is behind or unhealthy
const NODE_UNHEALTHY: i64 = -32005;
/// Preflight simulation failed
const PREFLIGHT_FAILURE: i64 = -32002;

/// Serializes a signed transaction into the cluster's wire format
pub trait TransactionEncoder: Send + Sync {
    fn encode(&self, tx: &Transaction) -> DeployResult<Vec<u8>>;
}

/// [`ChainClient`] over HTTP JSON-RPC
#[derive(Clone)]
pub struct RpcChainClient {
    url: String,
    agent: ureq::Agent,
    encoder: Option<Arc<dyn TransactionEncoder>>,
    next_id: Arc<AtomicU64>,
}

impl RpcChainClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url: url.into(),
            agent,
            encoder: None,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Enable submission with the given wire encoder
    pub fn with_encoder(mut self, encoder: Arc<dyn TransactionEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    async fn call(&self, method: &'static str, params: Value) -> DeployResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let agent = self.agent.clone();
        let url = self.url.clone();

        trace!(method, id, "RPC request");
        let response = tokio::task::spawn_blocking(move || -> DeployResult<Value> {
            let mut response = agent
                .post(&url)
                .send_json(&body)
                .map_err(|e| DeployError::rpc(format!("{}: {}", method, e)))?;
            response
                .body_mut()
                .read_json::<Value>()
                .map_err(|e| DeployError::rpc(format!("{}: invalid response body: {}", method, e)))
        })
        .await
        .map_err(|e| DeployError::Internal(format!("RPC task failed: {}", e)))??;

        let result = parse_response(method, response)?;
        debug!(method, id, "RPC response");
        Ok(result)
    }
}

/// Extract `result`, or map the JSON-RPC `error` object
fn parse_response(method: &str, mut response: Value) -> DeployResult<Value> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");

        if code == PREFLIGHT_FAILURE {
            return Err(DeployError::TransactionRejected(message.to_string()));
        }
        return Err(DeployError::Rpc {
            message: format!("{} failed ({}): {}", method, code, message),
            transient: matches!(code, BLOCK_NOT_AVAILABLE | NODE_UNHEALTHY),
        });
    }

    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(DeployError::rpc(format!("{}: response has no result", method))),
    }
}

fn malformed(method: &str, what: &str) -> DeployError {
    DeployError::Rpc {
        message: format!("{}: malformed response, {}", method, what),
        transient: false,
    }
}

fn parse_account_info(result: &Value) -> DeployResult<Option<Vec<u8>>> {
    let value = match result.get("value") {
        Some(Value::Null) | None => return Ok(None),
        Some(value) => value,
    };
    let encoded = value
        .pointer("/data/0")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("getAccountInfo", "missing data"))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| malformed("getAccountInfo", &format!("bad base64: {}", e)))?;
    Ok(Some(bytes))
}

fn parse_blockhash(result: &Value) -> DeployResult<Blockhash> {
    result
        .pointer("/value/blockhash")
        .and_then(Value::as_str)
        .map(|hash| Blockhash(hash.to_string()))
        .ok_or_else(|| malformed("getLatestBlockhash", "missing blockhash"))
}

fn parse_signature_status(result: &Value) -> DeployResult<SignatureStatus> {
    let status = match result.pointer("/value/0") {
        Some(Value::Null) | None => return Ok(SignatureStatus::Pending),
        Some(status) => status,
    };

    if let Some(err) = status.get("err").filter(|e| !e.is_null()) {
        return Ok(SignatureStatus::Failed(err.to_string()));
    }
    match status.get("confirmationStatus").and_then(Value::as_str) {
        Some("confirmed") | Some("finalized") => Ok(SignatureStatus::Confirmed),
        _ => Ok(SignatureStatus::Pending),
    }
}

fn parse_token_account(result: &Value) -> DeployResult<Option<TokenAccount>> {
    let Some(entry) = result
        .get("value")
        .and_then(Value::as_array)
        .and_then(|accounts| accounts.first())
    else {
        return Ok(None);
    };

    let address = entry
        .get("pubkey")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("getTokenAccountsByOwner", "missing pubkey"))?;
    let info = entry
        .pointer("/account/data/parsed/info")
        .ok_or_else(|| malformed("getTokenAccountsByOwner", "missing parsed info"))?;
    let amount = info
        .pointer("/tokenAmount/amount")
        .and_then(Value::as_str)
        .and_then(|a| a.parse::<u64>().ok())
        .ok_or_else(|| malformed("getTokenAccountsByOwner", "missing token amount"))?;
    let delegate = info
        .get("delegate")
        .and_then(Value::as_str)
        .map(Address::new);

    Ok(Some(TokenAccount {
        address: Address::new(address),
        amount,
        delegate,
    }))
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_account_bytes(&self, address: &Address) -> DeployResult<Option<Vec<u8>>> {
        let result = self
            .call(
                "getAccountInfo",
                json!([address.as_str(), { "encoding": "base64", "commitment": "confirmed" }]),
            )
            .await?;
        parse_account_info(&result)
    }

    async fn get_recent_blockhash(&self) -> DeployResult<Blockhash> {
        let result = self
            .call("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;
        parse_blockhash(&result)
    }

    async fn submit_transaction(&self, tx: &Transaction) -> DeployResult<TxId> {
        let encoder = self.encoder.as_ref().ok_or_else(|| {
            DeployError::config("this RPC client has no transaction encoder and cannot submit")
        })?;
        let wire = BASE64.encode(encoder.encode(tx)?);

        let result = self
            .call(
                "sendTransaction",
                json!([wire, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
            )
            .await?;
        result
            .as_str()
            .map(|sig| TxId(sig.to_string()))
            .ok_or_else(|| malformed("sendTransaction", "missing signature"))
    }

    async fn get_signature_status(&self, txid: &TxId) -> DeployResult<SignatureStatus> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[txid.0], { "searchTransactionHistory": true }]),
            )
            .await?;
        parse_signature_status(&result)
    }

    async fn get_minimum_rent_exempt_balance(&self, size: usize) -> DeployResult<u64> {
        let result = self
            .call("getMinimumBalanceForRentExemption", json!([size]))
            .await?;
        result
            .as_u64()
            .ok_or_else(|| malformed("getMinimumBalanceForRentExemption", "not a number"))
    }

    async fn get_token_account(
        &self,
        owner: &Address,
        mint: &Address,
    ) -> DeployResult<Option<TokenAccount>> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner.as_str(), { "mint": mint.as_str() }, { "encoding": "jsonParsed" }]),
            )
            .await?;
        parse_token_account(&result)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("url", &self.url)
            .field("can_submit", &self.encoder.is_some())
            .finish()
    }
}
