//! candy-deploy - resumable candy machine deployments
//!
//! Uploads collection assets to a storage backend, writes their config lines
//! to a candy machine account in batched transactions, and verifies the
//! written lines against a local cache that survives interrupted runs.

pub mod assets;
pub mod cache;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod mint;
pub mod retry;
pub mod storage;
pub mod ui;
pub mod upload;
pub mod verify;
pub mod wallet;

pub use error::{DeployError, DeployResult};
