//! Signing keys
//!
//! Key storage is outside this crate; pipelines only see the [`Signer`] and
//! [`KeySource`] traits. [`MemoryKeySource`] backs tests and local runs.

use crate::chain::Address;
use crate::error::DeployResult;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// A key able to authorize transactions
pub trait Signer: Send + Sync {
    /// Public address of the key
    fn address(&self) -> Address;

    /// Sign a transaction message
    fn sign(&self, message: &[u8]) -> DeployResult<Vec<u8>>;
}

/// Supplies the paying wallet and fresh single-use keys
pub trait KeySource: Send + Sync {
    /// Wallet paying fees and holding authority
    fn payer(&self) -> Arc<dyn Signer>;

    /// New key for an account created in this run (candy machine, mint, delegate)
    fn generate(&self) -> Arc<dyn Signer>;
}

/// In-process key; signatures are SHA-256 over secret and message
#[derive(Debug, Clone)]
pub struct MemoryKeypair {
    address: Address,
    secret: [u8; 32],
}

impl MemoryKeypair {
    /// Derive a key from a seed
    pub fn from_seed(seed: &[u8]) -> Self {
        let secret: [u8; 32] = Sha256::digest(seed).into();
        let public = Sha256::digest(secret);
        Self {
            address: Address::new(hex::encode(&public[..20])),
            secret,
        }
    }

    pub fn random() -> Self {
        Self::from_seed(Uuid::new_v4().as_bytes())
    }
}

impl Signer for MemoryKeypair {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn sign(&self, message: &[u8]) -> DeployResult<Vec<u8>> {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(message);
        Ok(hasher.finalize().to_vec())
    }
}

/// Key source backed by [`MemoryKeypair`]s
#[derive(Debug, Clone)]
pub struct MemoryKeySource {
    payer: Arc<MemoryKeypair>,
}

impl MemoryKeySource {
    pub fn new() -> Self {
        Self {
            payer: Arc::new(MemoryKeypair::random()),
        }
    }

    /// Use a fixed payer, so addresses are stable across runs
    pub fn with_payer(payer: MemoryKeypair) -> Self {
        Self {
            payer: Arc::new(payer),
        }
    }
}

impl Default for MemoryKeySource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for MemoryKeySource {
    fn payer(&self) -> Arc<dyn Signer> {
        self.payer.clone()
    }

    fn generate(&self) -> Arc<dyn Signer> {
        Arc::new(MemoryKeypair::random())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_keys_are_stable() {
        let a = MemoryKeypair::from_seed(b"payer");
        let b = MemoryKeypair::from_seed(b"payer");
        assert_eq!(a.address(), b.address());
        assert_eq!(a.sign(b"msg").unwrap(), b.sign(b"msg").unwrap());
        assert_eq!(a.address().as_str().len(), 40);
    }

    #[test]
    fn generated_keys_differ() {
        let keys = MemoryKeySource::new();
        assert_ne!(keys.generate().address(), keys.generate().address());
        assert_eq!(keys.payer().address(), keys.payer().address());
    }
}
