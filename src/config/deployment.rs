//! Deployment settings for one collection
//!
//! Read from the JSON file given on the command line. The optional sections
//! (whitelist, gatekeeper, end settings, hidden settings) are independent
//! structures, each validated on its own.

use crate::error::{DeployError, DeployResult};
use crate::ledger::{MAX_NAME_LENGTH, MAX_URI_LENGTH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lamports per SOL, the default price unit
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Environment where bundled arweave storage is allowed
pub const MAINNET: &str = "mainnet-beta";

/// Root deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Where assets are uploaded
    pub storage: StorageConfig,

    /// Mint price in SOL (or in whole SPL tokens when `spl_token` is set)
    pub price: f64,

    /// Wallet receiving mint proceeds
    pub treasury_wallet: String,

    /// Items available; defaults to the number of asset pairs
    #[serde(default)]
    pub number: Option<u32>,

    /// Overrides the number of chunk transactions in flight
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// SPL token mint used for payment
    #[serde(default)]
    pub spl_token: Option<String>,

    /// Decimals of the SPL payment token
    #[serde(default)]
    pub spl_token_decimals: Option<u8>,

    #[serde(default)]
    pub go_live_date: Option<DateTime<Utc>>,

    /// Six character identifier; derived from the account address when absent
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default = "default_true")]
    pub retain_authority: bool,

    #[serde(default = "default_true")]
    pub is_mutable: bool,

    #[serde(default)]
    pub whitelist_mint_settings: Option<WhitelistMintSettings>,

    #[serde(default)]
    pub gatekeeper: Option<GatekeeperConfig>,

    #[serde(default)]
    pub end_settings: Option<EndSettings>,

    #[serde(default)]
    pub hidden_settings: Option<HiddenSettings>,
}

fn default_true() -> bool {
    true
}

impl DeploymentConfig {
    /// Validate every section for the target environment
    pub fn validate(&self, env: &str) -> DeployResult<()> {
        self.storage.validate(env)?;

        if !self.price.is_finite() || self.price < 0.0 {
            return Err(DeployError::config(format!(
                "price must be a non-negative number, got {}",
                self.price
            )));
        }
        if self.treasury_wallet.trim().is_empty() {
            return Err(DeployError::config("treasuryWallet is required"));
        }
        if self.batch_size == Some(0) {
            return Err(DeployError::config("batchSize must be at least 1"));
        }
        if let Some(uuid) = &self.uuid {
            if uuid.chars().count() != 6 {
                return Err(DeployError::config(format!(
                    "uuid must be exactly 6 characters, got {:?}",
                    uuid
                )));
            }
        }

        if let Some(whitelist) = &self.whitelist_mint_settings {
            whitelist.validate()?;
        }
        if let Some(gatekeeper) = &self.gatekeeper {
            gatekeeper.validate()?;
        }
        if let Some(end) = &self.end_settings {
            end.validate()?;
        }
        if let Some(hidden) = &self.hidden_settings {
            hidden.validate()?;
        }
        Ok(())
    }

    /// Price in the payment token's smallest unit
    pub fn price_base_units(&self) -> u64 {
        let decimals = match self.spl_token {
            Some(_) => self.spl_token_decimals.unwrap_or(9),
            None => 9,
        };
        (self.price * 10f64.powi(i32::from(decimals))).round() as u64
    }
}

/// Storage backend selection with its credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageConfig {
    Arweave,
    ArweaveSol,
    #[serde(rename_all = "camelCase")]
    ArweaveBundle {
        #[serde(default)]
        jwk: Option<PathBuf>,
    },
    #[serde(rename_all = "camelCase")]
    Ipfs {
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        secret: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NftStorage {
        #[serde(default)]
        api_key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Aws {
        #[serde(default)]
        bucket: Option<String>,
    },
    /// Content-addressed directory, for local runs
    Local { dir: PathBuf },
}

impl StorageConfig {
    pub fn validate(&self, env: &str) -> DeployResult<()> {
        match self {
            Self::ArweaveSol | Self::ArweaveBundle { .. } if env != MAINNET => {
                Err(DeployError::config(format!(
                    "the {} storage option only works on {}; use arweave, aws, ipfs or nft-storage on {}",
                    self, MAINNET, env
                )))
            }
            Self::ArweaveBundle { jwk: None } => Err(DeployError::config(
                "path to an Arweave JWK wallet file must be provided when using arweave-bundle",
            )),
            Self::Ipfs {
                project_id,
                secret,
            } if is_blank(project_id) || is_blank(secret) => Err(DeployError::config(
                "IPFS selected as storage option but Infura project id or secret key were not provided",
            )),
            Self::NftStorage { api_key } if is_blank(api_key) => Err(DeployError::config(
                "nft-storage selected as storage option but no API key was provided",
            )),
            Self::Aws { bucket } if is_blank(bucket) => Err(DeployError::config(
                "aws selected as storage option but no existing bucket name was provided",
            )),
            _ => Ok(()),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl fmt::Display for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Arweave => "arweave",
            Self::ArweaveSol => "arweave-sol",
            Self::ArweaveBundle { .. } => "arweave-bundle",
            Self::Ipfs { .. } => "ipfs",
            Self::NftStorage { .. } => "nft-storage",
            Self::Aws { .. } => "aws",
            Self::Local { .. } => "local",
        };
        write!(f, "{}", name)
    }
}

/// How whitelist tokens are consumed on mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WhitelistMode {
    BurnEveryTime,
    NeverBurn,
}

/// Whitelist gating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistMintSettings {
    pub mode: WhitelistMode,

    /// Mint of the whitelist token
    pub mint: String,

    #[serde(default)]
    pub presale: bool,

    /// Price for whitelisted wallets, in the same unit as `price`
    #[serde(default)]
    pub discount_price: Option<f64>,
}

impl WhitelistMintSettings {
    pub fn validate(&self) -> DeployResult<()> {
        if self.mint.trim().is_empty() {
            return Err(DeployError::config("whitelistMintSettings.mint is required"));
        }
        if matches!(self.discount_price, Some(p) if !p.is_finite() || p < 0.0) {
            return Err(DeployError::config(
                "whitelistMintSettings.discountPrice must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Captcha gatekeeper network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatekeeperConfig {
    pub gatekeeper_network: String,

    #[serde(default)]
    pub expire_on_use: bool,
}

impl GatekeeperConfig {
    pub fn validate(&self) -> DeployResult<()> {
        if self.gatekeeper_network.trim().is_empty() {
            return Err(DeployError::config("gatekeeper.gatekeeperNetwork is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndSettingType {
    /// `number` is a unix timestamp
    Date,
    /// `number` is an item count
    Amount,
}

/// When minting stops
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSettings {
    pub end_setting_type: EndSettingType,
    pub number: u64,
}

impl EndSettings {
    pub fn validate(&self) -> DeployResult<()> {
        if self.number == 0 {
            return Err(DeployError::config("endSettings.number must be greater than 0"));
        }
        Ok(())
    }
}

/// Shared placeholder metadata; no per-item config lines are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenSettings {
    pub name: String,
    pub uri: String,
    pub hash: String,
}

impl HiddenSettings {
    pub fn validate(&self) -> DeployResult<()> {
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(DeployError::config(format!(
                "hiddenSettings.name exceeds {} bytes",
                MAX_NAME_LENGTH
            )));
        }
        if self.uri.len() > MAX_URI_LENGTH {
            return Err(DeployError::config(format!(
                "hiddenSettings.uri exceeds {} bytes",
                MAX_URI_LENGTH
            )));
        }
        if self.hash.len() != 32 {
            return Err(DeployError::config(format!(
                "hiddenSettings.hash must be 32 bytes, got {}",
                self.hash.len()
            )));
        }
        Ok(())
    }
}
