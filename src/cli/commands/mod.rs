//! CLI command implementations

pub mod config;
pub mod status;
pub mod verify;

pub use config::execute as config;
pub use status::execute as status;
pub use verify::execute as verify;

use crate::cache::{CacheFile, CacheStore};
use crate::cli::Cli;
use crate::config::Settings;

/// Cache file and environment selected by the global flags
#[derive(Debug, Clone)]
pub struct Target {
    pub env: String,
    pub cache: CacheFile,
}

impl Target {
    /// Flags win over settings
    pub fn resolve(cli: &Cli, settings: &Settings) -> Self {
        let env = cli
            .env
            .clone()
            .unwrap_or_else(|| settings.general.env.clone());
        let name = cli
            .cache_name
            .clone()
            .unwrap_or_else(|| settings.cache.default_name.clone());
        let dir = cli
            .cache_dir
            .clone()
            .unwrap_or_else(|| settings.cache.dir.clone());

        let cache = CacheStore::new(dir).file(&name, &env);
        Self { env, cache }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    #[test]
    fn flags_override_settings() {
        let settings = Settings::default();

        let cli = Cli::parse_from(["candy-deploy", "status"]);
        let target = Target::resolve(&cli, &settings);
        assert_eq!(target.env, "devnet");
        assert_eq!(target.cache.path(), Path::new(".cache/devnet-temp"));

        let cli = Cli::parse_from([
            "candy-deploy",
            "status",
            "--env",
            "mainnet-beta",
            "--cache-name",
            "drop1",
            "--cache-dir",
            "/tmp/caches",
        ]);
        let target = Target::resolve(&cli, &settings);
        assert_eq!(target.cache.path(), Path::new("/tmp/caches/mainnet-beta-drop1"));
    }
}
