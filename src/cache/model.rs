//! Cache records

use crate::chain::Address;
use crate::config::deployment::WhitelistMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deployment state of one collection index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheItem {
    /// Descriptor URI returned by storage
    pub link: String,

    /// Image URI returned by storage
    pub image_link: String,

    /// Name written to the config line
    pub name: String,

    /// Config line confirmed on chain
    pub on_chain: bool,

    /// Config line checked against chain bytes
    pub verify_run: bool,
}

impl CacheItem {
    pub fn is_uploaded(&self) -> bool {
        !self.link.is_empty()
    }

    /// Reset after a failed verification so the next upload rewrites the line
    pub fn mark_mismatch(&mut self) {
        self.on_chain = false;
        self.verify_run = false;
    }
}

/// Whitelist token recorded at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistInfo {
    pub mint: Address,
    pub mode: WhitelistMode,
}

/// Immutable deployment parameters, set when the account is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramInfo {
    pub candy_machine: Option<Address>,

    /// Address of a creation sent but not yet confirmed; checked on chain
    /// before a new account is created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_candy_machine: Option<Address>,

    pub uuid: String,
    pub items_available: u32,
    pub authority: Option<Address>,
    pub treasury_wallet: Option<Address>,

    /// Price in the payment token's smallest unit
    pub price: u64,

    pub token_mint: Option<Address>,
    pub whitelist: Option<WhitelistInfo>,
    pub hidden_settings: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Root cache document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub program: ProgramInfo,

    /// Items by index; JSON keys are the decimal index
    pub items: BTreeMap<u32, CacheItem>,
}

/// Counts of items per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSummary {
    pub total: usize,
    pub uploaded: usize,
    pub on_chain: usize,
    pub verified: usize,
}

impl Cache {
    /// Whether the candy machine account exists
    pub fn is_created(&self) -> bool {
        self.program.candy_machine.is_some()
    }

    pub fn item(&self, index: u32) -> Option<&CacheItem> {
        self.items.get(&index)
    }

    /// Item at `index`, inserting an empty one if missing
    pub fn item_mut(&mut self, index: u32) -> &mut CacheItem {
        self.items.entry(index).or_default()
    }

    pub fn summary(&self) -> CacheSummary {
        self.items.values().fold(
            CacheSummary {
                total: self.items.len(),
                ..CacheSummary::default()
            },
            |mut acc, item| {
                acc.uploaded += usize::from(item.is_uploaded());
                acc.on_chain += usize::from(item.on_chain);
                acc.verified += usize::from(item.verify_run);
                acc
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_serialize_with_string_keys() {
        let mut cache = Cache::default();
        cache.item_mut(10).link = "https://arweave.net/ten".into();
        cache.item_mut(2).on_chain = true;

        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(json["items"]["10"]["link"], "https://arweave.net/ten");
        assert_eq!(json["items"]["2"]["onChain"], true);

        let keys: Vec<u32> = cache.items.keys().copied().collect();
        assert_eq!(keys, vec![2, 10]);
    }

    #[test]
    fn reads_existing_cache_layout() {
        let json = r#"{
            "program": { "uuid": "Abc123", "candyMachine": "CandyMachine111" },
            "items": {
                "0": { "link": "https://a", "name": "A", "onChain": true, "verifyRun": false },
                "1": { "link": "https://b", "name": "B", "onChain": false }
            }
        }"#;
        let cache: Cache = serde_json::from_str(json).unwrap();

        assert!(cache.is_created());
        assert_eq!(cache.program.uuid, "Abc123");
        assert!(!cache.item(1).unwrap().verify_run);
    }

    #[test]
    fn mismatch_clears_both_flags() {
        let mut item = CacheItem {
            link: "l".into(),
            on_chain: true,
            verify_run: true,
            ..CacheItem::default()
        };
        item.mark_mismatch();
        assert!(!item.on_chain);
        assert!(!item.verify_run);
        assert!(item.is_uploaded());
    }

    #[test]
    fn summary_counts_states() {
        let mut cache = Cache::default();
        cache.item_mut(0).link = "a".into();
        cache.item_mut(0).on_chain = true;
        cache.item_mut(0).verify_run = true;
        cache.item_mut(1).link = "b".into();
        cache.item_mut(2);

        assert_eq!(
            cache.summary(),
            CacheSummary {
                total: 3,
                uploaded: 2,
                on_chain: 1,
                verified: 1
            }
        );
    }
}
