//! Error types for candy-deploy
//!
//! All modules use `DeployResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for deployment operations
pub type DeployResult<T> = Result<T, DeployError>;

/// All errors that can occur while deploying or verifying a collection
#[derive(Error, Debug)]
pub enum DeployError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Cache errors
    #[error("Cache not found: {env}-{name}")]
    CacheNotFound { name: String, env: String },

    // Ledger errors
    #[error("Malformed on-chain record: need {needed} bytes, account has {actual}")]
    MalformedRecord { needed: usize, actual: usize },

    #[error("Account not found on chain: {0}")]
    AccountNotFound(String),

    // Chain errors
    #[error("RPC error: {message}")]
    Rpc { message: String, transient: bool },

    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("Transaction {txid} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { txid: String, timeout_secs: u64 },

    #[error("Transaction submission failed after {attempts} attempt(s): {source}")]
    SubmissionFailed {
        attempts: u32,
        #[source]
        source: Box<DeployError>,
    },

    // Storage errors
    #[error("Storage upload failed ({backend}): {message}")]
    Storage {
        backend: String,
        message: String,
        permanent: bool,
    },

    // Pipeline outcomes
    #[error(
        "Upload incomplete: {failed_uploads} upload(s) and {failed_chunks} chunk(s) failed ({} index(es) need attention)",
        failed_indices.len()
    )]
    PartialUploadFailure {
        failed_uploads: usize,
        failed_chunks: usize,
        failed_indices: Vec<u32>,
    },

    #[error("Deployment incomplete: {written} of {expected} config lines written")]
    IncompleteDeployment { written: u32, expected: u32 },

    #[error(
        "Verification failed: {mismatched} mismatched, {malformed} malformed and {missing} never uploaded item(s)"
    )]
    VerificationFailed {
        mismatched: usize,
        malformed: usize,
        missing: usize,
        failed_indices: Vec<u32>,
    },

    #[error("Minting stopped after {minted} of {requested} token(s): {source}")]
    MintIncomplete {
        minted: u32,
        requested: u32,
        #[source]
        source: Box<DeployError>,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Create a transient RPC error
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a storage error
    pub fn storage(backend: impl Into<String>, message: impl Into<String>, permanent: bool) -> Self {
        Self::Storage {
            backend: backend.into(),
            message: message.into(),
            permanent,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc { transient, .. } => *transient,
            Self::Storage { permanent, .. } => !permanent,
            Self::ConfirmationTimeout { .. } | Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CacheNotFound { .. } => {
                Some("Check --cache-name and --env, or run the upload first")
            }
            Self::SubmissionFailed { .. } | Self::PartialUploadFailure { .. } => {
                Some("Completed work is saved in the cache; re-run the upload to resume")
            }
            Self::IncompleteDeployment { .. } => {
                Some("Finish uploading all config lines before verifying")
            }
            Self::VerificationFailed { .. } => {
                Some("Flagged items were reset in the cache; re-run the upload to rewrite them")
            }
            _ => None,
        }
    }
}
