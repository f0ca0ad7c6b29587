//! Tool settings schema
//!
//! Settings are stored at `~/.config/candy-deploy/config.toml`. Every section
//! falls back to its defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// General settings
    pub general: GeneralConfig,

    /// Local cache settings
    pub cache: CacheConfig,

    /// Cluster endpoints
    pub rpc: RpcConfig,

    /// Transaction submission policy
    pub submit: SubmitConfig,

    /// Upload pipeline tuning
    pub upload: UploadConfig,

    /// Verification tuning
    pub verify: VerifyConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Default cluster environment
    pub env: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            env: "devnet".to_string(),
        }
    }
}

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding `<env>-<name>` cache files
    pub dir: PathBuf,

    /// Cache name used when none is given
    pub default_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
            default_name: "temp".to_string(),
        }
    }
}

/// RPC endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Endpoint URL per environment name
    pub endpoints: BTreeMap<String, String>,

    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl RpcConfig {
    /// Resolve the endpoint for an environment
    pub fn endpoint(&self, env: &str) -> Option<&str> {
        self.endpoints.get(env).map(String::as_str)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        let endpoints = [
            ("devnet", "https://api.devnet.solana.com"),
            ("testnet", "https://api.testnet.solana.com"),
            ("mainnet-beta", "https://api.mainnet-beta.solana.com"),
        ]
        .into_iter()
        .map(|(env, url)| (env.to_string(), url.to_string()))
        .collect();

        Self {
            endpoints,
            request_timeout_secs: 30,
        }
    }
}

/// Transaction submission retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Resubmissions after the first attempt
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,

    /// How long to wait for a confirmation before resubmitting
    pub confirm_timeout_secs: u64,

    /// Signature status polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl SubmitConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            confirm_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Config lines written per transaction
    pub lines_per_transaction: usize,

    /// Chunk transactions in flight at once
    pub write_concurrency: usize,

    /// Storage uploads in flight at once
    pub upload_concurrency: usize,

    /// Retries for transient storage failures
    pub upload_retries: u32,

    /// Persist the cache after this many completed uploads
    pub save_every: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            lines_per_transaction: 10,
            write_concurrency: 4,
            upload_concurrency: 8,
            upload_retries: 2,
            save_every: 50,
        }
    }
}

/// Verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Persist the cache after this many checked items
    pub save_every: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { save_every: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serialize() {
        let settings = Settings::default();
        let toml = toml::to_string_pretty(&settings).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[submit]"));
        assert!(toml.contains("mainnet-beta"));
    }

    #[test]
    fn settings_deserialize_empty() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.cache.default_name, "temp");
        assert_eq!(settings.upload.lines_per_transaction, 10);
        assert_eq!(
            settings.rpc.endpoint("devnet"),
            Some("https://api.devnet.solana.com")
        );
    }

    #[test]
    fn settings_deserialize_partial() {
        let toml = r#"
            [submit]
            max_retries = 7

            [rpc.endpoints]
            localnet = "http://127.0.0.1:8899"
        "#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.submit.max_retries, 7);
        assert_eq!(settings.submit.initial_backoff_ms, 500); // default preserved
        assert_eq!(settings.rpc.endpoint("localnet"), Some("http://127.0.0.1:8899"));
        assert_eq!(settings.rpc.endpoint("devnet"), None);
    }

    #[test]
    fn submit_durations() {
        let submit = SubmitConfig::default();
        assert_eq!(submit.confirm_timeout(), Duration::from_secs(60));
        assert_eq!(submit.poll_interval(), Duration::from_millis(1_000));
    }
}
