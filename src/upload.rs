//! Batch uploader
//!
//! Drives a collection from files on disk to config lines on chain:
//!
//! 1. pair assets and check the requested item count
//! 2. upload images and descriptors for items without a link
//! 3. create the candy machine if the cache has none
//! 4. write config lines for uploaded items not yet on chain
//!
//! Every step reads the cache first and skips completed work, so a rerun
//! after a crash or a partial failure only redoes what is missing. The cache
//! is owned by this task alone; concurrent work reports back here and the
//! cache is saved after each confirmed state change.

use crate::assets::{collect_pairs, AssetPair};
use crate::cache::{Cache, CacheFile, ProgramInfo, WhitelistInfo};
use crate::chain::{
    AccountOwner, Address, CandyMachineData, Creator, Instruction, TransactionSubmitter,
};
use crate::config::deployment::DeploymentConfig;
use crate::config::schema::UploadConfig;
use crate::error::{DeployError, DeployResult};
use crate::ledger::{self, ConfigLine, MAX_SYMBOL_LENGTH};
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::{content_type_for, StorageBackend};
use crate::wallet::KeySource;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// What to deploy
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Asset files; anything that is not an image or descriptor is ignored
    pub files: Vec<PathBuf>,

    /// Items available on the machine; defaults to `deployment.number`, then
    /// to the number of pairs
    pub total_items: Option<u32>,

    pub deployment: DeploymentConfig,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub candy_machine: Address,
    /// Candy machine created by this run
    pub created: bool,
    pub uploaded: usize,
    /// Items that already had a link
    pub skipped: usize,
    pub chunks_written: usize,
    pub lines_written: usize,
}

/// Links produced by uploading one pair
#[derive(Debug)]
struct UploadedItem {
    link: String,
    image_link: String,
    name: String,
}

/// Runs the upload pipeline against one cache file
pub struct Uploader {
    storage: Arc<dyn StorageBackend>,
    submitter: TransactionSubmitter,
    keys: Arc<dyn KeySource>,
    cache: CacheFile,
    config: UploadConfig,
    upload_retry: RetryPolicy,
}

impl Uploader {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        submitter: TransactionSubmitter,
        keys: Arc<dyn KeySource>,
        cache: CacheFile,
        config: UploadConfig,
        retry: RetryPolicy,
    ) -> Self {
        let upload_retry = retry.with_max_retries(config.upload_retries);
        Self {
            storage,
            submitter,
            keys,
            cache,
            config,
            upload_retry,
        }
    }

    pub async fn run(&self, request: UploadRequest) -> DeployResult<UploadReport> {
        let UploadRequest {
            files,
            total_items,
            deployment,
        } = request;

        deployment.validate(self.cache.env())?;
        let pairs = collect_pairs(&files)?;
        if pairs.is_empty() {
            return Err(DeployError::config("no image/descriptor pairs found"));
        }
        let total = total_items
            .or(deployment.number)
            .unwrap_or(pairs.len() as u32);
        if (total as usize) < pairs.len() {
            return Err(DeployError::config(format!(
                "item count ({}) cannot be smaller than the number of asset pairs ({})",
                total,
                pairs.len()
            )));
        }

        let mut cache = self.cache.load_or_default().await?;
        info!(
            "Deploying {} asset pair(s) for {} item(s) to {} via {}",
            pairs.len(),
            total,
            self.submitter.chain().endpoint(),
            self.storage.name()
        );

        let (uploaded, skipped, failed_uploads) = self.upload_assets(&mut cache, &pairs).await?;

        let created = if cache.is_created() {
            if cache.program.items_available != total {
                warn!(
                    "Candy machine holds {} items; ignoring requested count {}",
                    cache.program.items_available, total
                );
            }
            false
        } else {
            self.create_candy_machine(&mut cache, &pairs, total, &deployment)
                .await?
        };

        let candy_machine = cache
            .program
            .candy_machine
            .clone()
            .ok_or_else(|| DeployError::Internal("candy machine missing after creation".into()))?;

        let (chunks_written, lines_written, failed_chunks) = if cache.program.hidden_settings {
            info!("Hidden settings in use; no config lines to write");
            (0, 0, Vec::new())
        } else {
            let concurrency = deployment
                .batch_size
                .unwrap_or(self.config.write_concurrency);
            self.write_config_lines(&mut cache, &candy_machine, concurrency)
                .await?
        };

        if !failed_uploads.is_empty() || !failed_chunks.is_empty() {
            let mut failed_indices: Vec<u32> = failed_uploads
                .iter()
                .copied()
                .chain(failed_chunks.iter().flatten().copied())
                .collect();
            failed_indices.sort_unstable();
            failed_indices.dedup();
            return Err(DeployError::PartialUploadFailure {
                failed_uploads: failed_uploads.len(),
                failed_chunks: failed_chunks.len(),
                failed_indices,
            });
        }

        info!(
            "Upload complete: {} uploaded, {} skipped, {} line(s) in {} chunk(s)",
            uploaded, skipped, lines_written, chunks_written
        );
        Ok(UploadReport {
            candy_machine,
            created,
            uploaded,
            skipped,
            chunks_written,
            lines_written,
        })
    }

    /// Upload pending pairs; returns (uploaded, skipped, failed indices)
    async fn upload_assets(
        &self,
        cache: &mut Cache,
        pairs: &[AssetPair],
    ) -> DeployResult<(usize, usize, Vec<u32>)> {
        let pending: Vec<&AssetPair> = pairs
            .iter()
            .filter(|pair| !cache.item(pair.index).is_some_and(|item| item.is_uploaded()))
            .collect();
        let skipped = pairs.len() - pending.len();
        if pending.is_empty() {
            debug!("All {} pair(s) already uploaded", pairs.len());
            return Ok((0, skipped, Vec::new()));
        }

        info!("Uploading {} pair(s), {} already done", pending.len(), skipped);
        let mut results = stream::iter(pending)
            .map(|pair| async move { (pair.index, self.upload_pair(pair).await) })
            .buffer_unordered(self.config.upload_concurrency.max(1));

        let mut uploaded = 0;
        let mut failed = Vec::new();
        let mut unsaved = 0;
        while let Some((index, result)) = results.next().await {
            match result {
                Ok(done) => {
                    let item = cache.item_mut(index);
                    item.link = done.link;
                    item.image_link = done.image_link;
                    item.name = done.name;
                    item.on_chain = false;
                    item.verify_run = false;
                    uploaded += 1;
                    unsaved += 1;
                    if unsaved >= self.config.save_every.max(1) {
                        self.cache.save(cache).await?;
                        unsaved = 0;
                    }
                }
                Err(e) => {
                    warn!("Upload of item {} failed: {}", index, e);
                    failed.push(index);
                }
            }
        }

        if unsaved > 0 {
            self.cache.save(cache).await?;
        }
        Ok((uploaded, skipped, failed))
    }

    async fn upload_pair(&self, pair: &AssetPair) -> DeployResult<UploadedItem> {
        let image_name = file_name(&pair.image)?;
        let image = read_file(&pair.image).await?;
        let mut descriptor = read_descriptor(&pair.descriptor).await?;

        let name = descriptor
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                DeployError::config(format!("{} has no \"name\"", pair.descriptor.display()))
            })?;

        let image_link = self
            .store(&image_name, image, content_type_for(&pair.image))
            .await?;
        rewrite_image_references(&mut descriptor, &image_name, &image_link);

        let descriptor_name = file_name(&pair.descriptor)?;
        let link = self
            .store(
                &descriptor_name,
                serde_json::to_vec_pretty(&descriptor)?,
                content_type_for(&pair.descriptor),
            )
            .await?;

        debug!("Item {} uploaded: {}", pair.index, link);
        Ok(UploadedItem {
            link,
            image_link,
            name,
        })
    }

    async fn store(&self, file_name: &str, bytes: Vec<u8>, content_type: &str) -> DeployResult<String> {
        with_retry(&self.upload_retry, "storage_upload", || {
            self.storage.upload(file_name, bytes.clone(), content_type)
        })
        .await
        .map_err(|exhausted| exhausted.last)
    }

    /// Create the candy machine, or adopt one an earlier attempt created
    ///
    /// The new address is saved as pending before the transaction is sent.
    /// If the submission fails but the account exists, or a rerun finds the
    /// pending account on chain, that account is recorded instead of paying
    /// for a second one. Returns whether this run created it.
    async fn create_candy_machine(
        &self,
        cache: &mut Cache,
        pairs: &[AssetPair],
        total: u32,
        deployment: &DeploymentConfig,
    ) -> DeployResult<bool> {
        let payer = self.keys.payer();

        if let Some(pending) = cache.program.pending_candy_machine.clone() {
            if self.account_exists(&pending).await? {
                info!("Candy machine {} from an earlier run exists; resuming with it", pending);
                cache.program = program_info(pending, &payer.address(), total, deployment)?;
                self.cache.save(cache).await?;
                return Ok(false);
            }
            debug!("Candy machine {} was never created; creating a new one", pending);
        }

        let candy = self.keys.generate();
        let candy_address = candy.address();
        let program = program_info(candy_address.clone(), &payer.address(), total, deployment)?;

        let first = read_descriptor(&pairs[0].descriptor).await?;
        let hidden = deployment.hidden_settings.is_some();
        let space = ledger::account_size(total, hidden);
        let lamports = self
            .submitter
            .chain()
            .get_minimum_rent_exempt_balance(space)
            .await?;

        let data = CandyMachineData {
            uuid: program.uuid.clone(),
            price: program.price,
            items_available: total,
            symbol: descriptor_symbol(&first),
            seller_fee_basis_points: descriptor_seller_fee(&first)?,
            max_supply: 0,
            is_mutable: deployment.is_mutable,
            retain_authority: deployment.retain_authority,
            go_live_date: deployment.go_live_date.map(|d| d.timestamp()),
            creators: descriptor_creators(&first, &payer.address())?,
            end_settings: deployment.end_settings.clone(),
            hidden_settings: deployment.hidden_settings.clone(),
            whitelist_mint_settings: deployment.whitelist_mint_settings.clone(),
            gatekeeper: deployment.gatekeeper.clone(),
        };

        info!(
            "Creating candy machine {} ({} items, {} bytes)",
            candy_address, total, space
        );
        let instructions = vec![
            Instruction::CreateAccount {
                payer: payer.address(),
                new_account: candy_address.clone(),
                lamports,
                space: space as u64,
                owner: AccountOwner::CandyMachine,
            },
            Instruction::InitializeCandyMachine {
                candy_machine: candy_address.clone(),
                authority: payer.address(),
                wallet: deployment.treasury_wallet.parse()?,
                token_mint: program.token_mint.clone(),
                data: Box::new(data),
            },
        ];

        cache.program.pending_candy_machine = Some(candy_address.clone());
        self.cache.save(cache).await?;

        if let Err(e) = self
            .submitter
            .submit(instructions, &[payer.clone(), candy])
            .await
        {
            if !matches!(self.account_exists(&candy_address).await, Ok(true)) {
                return Err(e);
            }
            warn!(
                "Creating {} reported an error but the account exists; continuing: {}",
                candy_address, e
            );
        }

        cache.program = program;
        self.cache.save(cache).await?;
        Ok(true)
    }

    async fn account_exists(&self, address: &Address) -> DeployResult<bool> {
        Ok(self
            .submitter
            .chain()
            .get_account_bytes(address)
            .await?
            .is_some())
    }

    /// Write pending lines; returns (chunks written, lines written, failed chunks)
    async fn write_config_lines(
        &self,
        cache: &mut Cache,
        candy_machine: &Address,
        concurrency: usize,
    ) -> DeployResult<(usize, usize, Vec<Vec<u32>>)> {
        let payer = self.keys.payer();
        if cache.program.authority.as_ref() != Some(&payer.address()) {
            return Err(DeployError::config(format!(
                "wallet {} is not the authority of candy machine {}",
                payer.address(),
                candy_machine
            )));
        }

        let items_available = cache.program.items_available;
        let pending: Vec<u32> = cache
            .items
            .iter()
            .filter(|(index, item)| item.is_uploaded() && !item.on_chain && **index < items_available)
            .map(|(index, _)| *index)
            .collect();
        if pending.is_empty() {
            debug!("No config lines pending");
            return Ok((0, 0, Vec::new()));
        }

        let chunks = plan_chunks(&pending, self.config.lines_per_transaction);
        info!(
            "Writing {} config line(s) in {} transaction(s)",
            pending.len(),
            chunks.len()
        );

        let jobs: Vec<(Vec<u32>, Instruction)> = chunks
            .into_iter()
            .map(|chunk| {
                let lines = chunk
                    .iter()
                    .map(|index| {
                        let item = cache.item(*index).cloned().unwrap_or_default();
                        ConfigLine::new(&item.name, &item.link)
                    })
                    .collect();
                let instruction = Instruction::AddConfigLines {
                    candy_machine: candy_machine.clone(),
                    authority: payer.address(),
                    index: chunk[0],
                    lines,
                };
                (chunk, instruction)
            })
            .collect();

        let signers = [payer];
        let mut results = stream::iter(jobs)
            .map(|(chunk, instruction)| {
                let signers = &signers;
                async move { (chunk, self.submitter.submit(vec![instruction], signers).await) }
            })
            .buffer_unordered(concurrency.max(1));

        let mut written = 0;
        let mut lines = 0;
        let mut failed = Vec::new();
        while let Some((chunk, result)) = results.next().await {
            match result {
                Ok(txid) => {
                    for index in &chunk {
                        cache.item_mut(*index).on_chain = true;
                    }
                    self.cache.save(cache).await?;
                    debug!(
                        "Chunk at {} ({} lines) confirmed in {:?}",
                        chunk[0],
                        chunk.len(),
                        txid.map(|t| t.0)
                    );
                    written += 1;
                    lines += chunk.len();
                }
                Err(e) => {
                    warn!(
                        "Writing lines {}..={} failed: {}",
                        chunk[0],
                        chunk[chunk.len() - 1],
                        e
                    );
                    failed.push(chunk);
                }
            }
        }
        Ok((written, lines, failed))
    }
}

/// Parameters recorded in the cache for a candy machine at `address`
fn program_info(
    address: Address,
    authority: &Address,
    total: u32,
    deployment: &DeploymentConfig,
) -> DeployResult<ProgramInfo> {
    let treasury: Address = deployment.treasury_wallet.parse()?;
    let token_mint = deployment
        .spl_token
        .as_deref()
        .map(str::parse::<Address>)
        .transpose()?;
    let whitelist = deployment
        .whitelist_mint_settings
        .as_ref()
        .map(|w| -> DeployResult<WhitelistInfo> {
            Ok(WhitelistInfo {
                mint: w.mint.parse()?,
                mode: w.mode,
            })
        })
        .transpose()?;
    let uuid = match &deployment.uuid {
        Some(uuid) => uuid.clone(),
        None => address.as_str().chars().take(6).collect(),
    };

    Ok(ProgramInfo {
        candy_machine: Some(address),
        pending_candy_machine: None,
        uuid,
        items_available: total,
        authority: Some(authority.clone()),
        treasury_wallet: Some(treasury),
        price: deployment.price_base_units(),
        token_mint,
        whitelist,
        hidden_settings: deployment.hidden_settings.is_some(),
        created_at: Some(Utc::now()),
    })
}

/// Split sorted indices into runs of consecutive indices, at most `max` each
pub fn plan_chunks(indices: &[u32], max: usize) -> Vec<Vec<u32>> {
    let max = max.max(1);
    let mut chunks: Vec<Vec<u32>> = Vec::new();
    for &index in indices {
        match chunks.last_mut() {
            Some(chunk)
                if chunk.len() < max && chunk.last().is_some_and(|last| last + 1 == index) =>
            {
                chunk.push(index)
            }
            _ => chunks.push(vec![index]),
        }
    }
    chunks
}

/// Point the descriptor at the uploaded image
fn rewrite_image_references(descriptor: &mut Value, image_name: &str, image_link: &str) {
    let previous = descriptor
        .get("image")
        .and_then(Value::as_str)
        .map(str::to_string);
    let refers_to_image = |uri: &str| uri == image_name || previous.as_deref() == Some(uri);

    if let Some(files) = descriptor
        .pointer_mut("/properties/files")
        .and_then(Value::as_array_mut)
    {
        for file in files {
            let matches = file
                .get("uri")
                .and_then(Value::as_str)
                .is_some_and(refers_to_image);
            if matches {
                file["uri"] = Value::String(image_link.to_string());
            }
        }
    }
    descriptor["image"] = Value::String(image_link.to_string());
}

fn descriptor_symbol(descriptor: &Value) -> String {
    let symbol = descriptor
        .get("symbol")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut truncated = String::new();
    for c in symbol.chars() {
        if truncated.len() + c.len_utf8() > MAX_SYMBOL_LENGTH {
            break;
        }
        truncated.push(c);
    }
    truncated
}

fn descriptor_seller_fee(descriptor: &Value) -> DeployResult<u16> {
    match descriptor.get("seller_fee_basis_points") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .filter(|fee| *fee <= 10_000)
            .map(|fee| fee as u16)
            .ok_or_else(|| {
                DeployError::config(format!("invalid seller_fee_basis_points: {}", value))
            }),
    }
}

fn descriptor_creators(descriptor: &Value, payer: &Address) -> DeployResult<Vec<Creator>> {
    let Some(entries) = descriptor
        .pointer("/properties/creators")
        .and_then(Value::as_array)
        .filter(|entries| !entries.is_empty())
    else {
        return Ok(vec![Creator {
            address: payer.clone(),
            verified: true,
            share: 100,
        }]);
    };

    if entries.len() > ledger::MAX_CREATOR_LIMIT {
        return Err(DeployError::config(format!(
            "at most {} creators are allowed, descriptor lists {}",
            ledger::MAX_CREATOR_LIMIT,
            entries.len()
        )));
    }

    let creators = entries
        .iter()
        .map(|entry| {
            let address: Address = entry
                .get("address")
                .and_then(Value::as_str)
                .ok_or_else(|| DeployError::config("creator without address"))?
                .parse()?;
            let share = entry
                .get("share")
                .and_then(Value::as_u64)
                .filter(|share| *share <= 100)
                .ok_or_else(|| DeployError::config(format!("creator {} has no valid share", address)))?;
            Ok(Creator {
                verified: &address == payer,
                address,
                share: share as u8,
            })
        })
        .collect::<DeployResult<Vec<_>>>()?;

    let total: u32 = creators.iter().map(|c| u32::from(c.share)).sum();
    if total != 100 {
        return Err(DeployError::config(format!(
            "creator shares must add up to 100, got {}",
            total
        )));
    }
    Ok(creators)
}

fn file_name(path: &Path) -> DeployResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DeployError::config(format!("invalid file name: {}", path.display())))
}

async fn read_file(path: &Path) -> DeployResult<Vec<u8>> {
    fs::read(path)
        .await
        .map_err(|e| DeployError::io(format!("reading {}", path.display()), e))
}

async fn read_descriptor(path: &Path) -> DeployResult<Value> {
    let bytes = read_file(path).await?;
    let value: Value = serde_json::from_slice(&bytes)?;
    if !value.is_object() {
        return Err(DeployError::config(format!(
            "{} is not a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chunks_split_on_gaps_and_size() {
        assert_eq!(
            plan_chunks(&[0, 1, 2, 3, 4, 7, 8, 10], 3),
            vec![vec![0, 1, 2], vec![3, 4], vec![7, 8], vec![10]]
        );
        assert!(plan_chunks(&[], 10).is_empty());
        assert_eq!(plan_chunks(&[5, 6], 0), vec![vec![5], vec![6]]);
    }

    #[test]
    fn chunks_never_share_an_index() {
        let indices: Vec<u32> = (0..57).filter(|i| i % 9 != 4).collect();
        let chunks = plan_chunks(&indices, 10);
        let flattened: Vec<u32> = chunks.iter().flatten().copied().collect();
        assert_eq!(flattened, indices);
        assert!(chunks.iter().all(|c| c.len() <= 10));
    }

    #[test]
    fn image_references_are_rewritten() {
        let mut descriptor = json!({
            "name": "Item #0",
            "image": "0.png",
            "properties": {
                "files": [
                    { "uri": "0.png", "type": "image/png" },
                    { "uri": "https://example.com/extra.mp4", "type": "video/mp4" }
                ]
            }
        });
        rewrite_image_references(&mut descriptor, "0.png", "https://arweave.net/img");

        assert_eq!(descriptor["image"], "https://arweave.net/img");
        assert_eq!(descriptor["properties"]["files"][0]["uri"], "https://arweave.net/img");
        assert_eq!(
            descriptor["properties"]["files"][1]["uri"],
            "https://example.com/extra.mp4"
        );
    }

    #[test]
    fn creators_default_to_payer() {
        let payer = Address::new("Payer111");
        let creators = descriptor_creators(&json!({}), &payer).unwrap();
        assert_eq!(creators.len(), 1);
        assert_eq!(creators[0].share, 100);
        assert!(creators[0].verified);
    }

    #[test]
    fn creator_shares_must_sum_to_100() {
        let payer = Address::new("Payer111");
        let descriptor = json!({ "properties": { "creators": [
            { "address": "A111", "share": 60 },
            { "address": "Payer111", "share": 30 }
        ]}});
        let err = descriptor_creators(&descriptor, &payer).unwrap_err();
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn seller_fee_bounds() {
        assert_eq!(descriptor_seller_fee(&json!({})).unwrap(), 0);
        assert_eq!(
            descriptor_seller_fee(&json!({ "seller_fee_basis_points": 500 })).unwrap(),
            500
        );
        assert!(descriptor_seller_fee(&json!({ "seller_fee_basis_points": 20000 })).is_err());
    }

    #[test]
    fn symbol_is_truncated() {
        assert_eq!(descriptor_symbol(&json!({ "symbol": "VERYLONGSYMBOL" })), "VERYLONGSY");
        assert_eq!(descriptor_symbol(&json!({})), "");
    }
}
