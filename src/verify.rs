//! Verification of written config lines
//!
//! Fetches the candy machine account once, checks the line count, then
//! compares every index below `items_available` that is not yet verified
//! with the line stored there. Items that do not match are reset so the next
//! upload rewrites them; indices that were never uploaded always fail.

use crate::cache::{Cache, CacheFile};
use crate::chain::{Address, ChainClient};
use crate::config::schema::VerifyConfig;
use crate::error::{DeployError, DeployResult};
use crate::ledger::{ConfigLine, LedgerAccount};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a clean verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub candy_machine: Address,
    /// Items compared in this run
    pub checked: usize,
    /// Items verified by an earlier run
    pub already_verified: usize,
    pub line_count: u32,
    pub items_available: u32,
}

/// Why an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Mismatch,
    Malformed,
    Missing,
}

/// Reconciles a cache against the chain
pub struct Verifier {
    chain: Arc<dyn ChainClient>,
    cache: CacheFile,
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(chain: Arc<dyn ChainClient>, cache: CacheFile, config: VerifyConfig) -> Self {
        Self {
            chain,
            cache,
            config,
        }
    }

    pub async fn run(&self) -> DeployResult<VerifyReport> {
        let mut cache = self.cache.load().await?;
        let candy_machine = cache.program.candy_machine.clone().ok_or_else(|| {
            DeployError::config(format!(
                "cache {} has no candy machine; run the upload first",
                self.cache.path().display()
            ))
        })?;
        if cache.program.hidden_settings {
            return Err(DeployError::config(
                "candy machine uses hidden settings and has no config lines to verify",
            ));
        }

        let data = self
            .chain
            .get_account_bytes(&candy_machine)
            .await?
            .ok_or_else(|| DeployError::AccountNotFound(candy_machine.to_string()))?;
        let account = LedgerAccount::from_bytes(data)?;

        let expected = cache.program.items_available;
        let line_count = account.line_count();
        if line_count < expected {
            return Err(DeployError::IncompleteDeployment {
                written: line_count,
                expected,
            });
        }

        if account.capacity() < expected {
            warn!(
                "Account {} holds {} line(s) but {} items are available",
                candy_machine,
                account.capacity(),
                expected
            );
        }

        let pending: Vec<u32> = (0..expected)
            .filter(|index| !cache.item(*index).is_some_and(|item| item.verify_run))
            .collect();
        let already_verified = expected as usize - pending.len();
        info!(
            "Verifying {} item(s) against {} ({} already verified)",
            pending.len(),
            candy_machine,
            already_verified
        );

        let result = self.check_items(&mut cache, &account, &pending).await;
        // progress is kept whatever the outcome
        self.cache.save(&cache).await?;
        let failures = result?;

        if !failures.is_empty() {
            let count = |kind: Failure| failures.iter().filter(|(_, f)| *f == kind).count();
            return Err(DeployError::VerificationFailed {
                mismatched: count(Failure::Mismatch),
                malformed: count(Failure::Malformed),
                missing: count(Failure::Missing),
                failed_indices: failures.into_iter().map(|(index, _)| index).collect(),
            });
        }

        info!("All {} item(s) match the chain", expected);
        Ok(VerifyReport {
            candy_machine,
            checked: pending.len(),
            already_verified,
            line_count,
            items_available: expected,
        })
    }

    async fn check_items(
        &self,
        cache: &mut Cache,
        account: &LedgerAccount,
        pending: &[u32],
    ) -> DeployResult<Vec<(u32, Failure)>> {
        let save_every = self.config.save_every.max(1);
        let mut failures = Vec::new();

        for (checked, index) in pending.iter().enumerate() {
            let Some(item) = cache.items.get_mut(index).filter(|item| item.is_uploaded()) else {
                warn!("Item {} was never uploaded; re-run the upload", index);
                failures.push((*index, Failure::Missing));
                continue;
            };
            let expected = ConfigLine::new(&item.name, &item.link);

            match account.line(*index) {
                Ok(line) if line == expected => {
                    item.verify_run = true;
                }
                Ok(line) => {
                    warn!(
                        "Item {} mismatch: chain has ({:?}, {:?}), cache has ({:?}, {:?}); marked for re-upload",
                        index, line.name, line.uri, expected.name, expected.uri
                    );
                    item.mark_mismatch();
                    failures.push((*index, Failure::Mismatch));
                }
                Err(DeployError::MalformedRecord { needed, actual }) => {
                    warn!(
                        "Item {} unreadable: account has {} bytes, line ends at {}; marked for re-upload",
                        index, actual, needed
                    );
                    item.mark_mismatch();
                    failures.push((*index, Failure::Malformed));
                }
                Err(e) => return Err(e),
            }

            if (checked + 1) % save_every == 0 {
                self.cache.save(cache).await?;
                debug!("Verification progress saved at item {}", index);
            }
        }
        Ok(failures)
    }
}
