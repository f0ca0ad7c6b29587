//! Integration tests for candy-deploy

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use candy_deploy::cache::{Cache, CacheStore};
    use candy_deploy::chain::Address;
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn candy_deploy(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("candy-deploy");
        cmd.env_remove("CANDY_DEPLOY_CONFIG")
            .arg("--config")
            .arg(temp.path().join("config.toml"))
            .arg("--cache-dir")
            .arg(temp.path().join(".cache"));
        cmd
    }

    fn seeded_cache(temp: &TempDir) {
        let mut cache = Cache::default();
        cache.program.candy_machine = Some(Address::new("Cndy111"));
        cache.program.items_available = 2;
        cache.item_mut(0).link = "https://arweave.net/0".into();
        cache.item_mut(0).on_chain = true;
        cache.item_mut(1).link = "https://arweave.net/1".into();

        let store = CacheStore::new(temp.path().join(".cache"));
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(store.save("temp", "devnet", &cache))
            .unwrap();
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        candy_deploy(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("resumable candy machine deployments"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        candy_deploy(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("candy-deploy"));
    }

    #[test]
    fn status_without_cache_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        candy_deploy(&temp)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache not found: devnet-temp"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn status_json_reports_progress() {
        let temp = TempDir::new().unwrap();
        seeded_cache(&temp);

        let output = candy_deploy(&temp)
            .args(["status", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["candyMachine"], "Cndy111");
        assert_eq!(value["env"], "devnet");
        assert_eq!(value["items"]["uploaded"], 2);
        assert_eq!(value["items"]["onChain"], 1);
        assert_eq!(value["items"]["verified"], 0);
    }

    #[test]
    fn status_table_runs() {
        let temp = TempDir::new().unwrap();
        seeded_cache(&temp);
        candy_deploy(&temp)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Cndy111"));
    }

    #[test]
    fn status_respects_env_flag() {
        let temp = TempDir::new().unwrap();
        seeded_cache(&temp);
        candy_deploy(&temp)
            .args(["status", "--env", "mainnet-beta"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("mainnet-beta-temp"));
    }

    #[test]
    fn verify_without_cache_fails() {
        let temp = TempDir::new().unwrap();
        candy_deploy(&temp)
            .args(["verify", "--rpc-url", "http://127.0.0.1:1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache not found"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        candy_deploy(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        candy_deploy(&temp).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());

        candy_deploy(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[submit]"))
            .stdout(predicate::str::contains("lines_per_transaction"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[submit\n").unwrap();
        candy_deploy(&temp)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("config"));
    }
}

mod pipeline_tests {
    use candy_deploy::assets::list_directory;
    use candy_deploy::cache::{CacheFile, CacheStore, ProgramInfo};
    use candy_deploy::chain::{Address, Instruction, MemoryChain, TransactionSubmitter};
    use candy_deploy::config::schema::{SubmitConfig, UploadConfig, VerifyConfig};
    use candy_deploy::config::DeploymentConfig;
    use candy_deploy::error::DeployError;
    use candy_deploy::ledger::{self, ConfigLine};
    use candy_deploy::mint::Minter;
    use candy_deploy::retry::RetryPolicy;
    use candy_deploy::storage::{self, MemoryStorage};
    use candy_deploy::upload::{UploadReport, UploadRequest, Uploader};
    use candy_deploy::verify::Verifier;
    use candy_deploy::wallet::{MemoryKeySource, MemoryKeypair};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        temp: TempDir,
        chain: Arc<MemoryChain>,
        storage: Arc<MemoryStorage>,
        keys: Arc<MemoryKeySource>,
        cache: CacheFile,
    }

    fn submit_config() -> SubmitConfig {
        SubmitConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            confirm_timeout_secs: 1,
            poll_interval_ms: 1,
        }
    }

    fn upload_config() -> UploadConfig {
        UploadConfig {
            lines_per_transaction: 2,
            write_concurrency: 2,
            upload_concurrency: 3,
            upload_retries: 1,
            save_every: 2,
        }
    }

    impl Harness {
        fn new(items: u32) -> Self {
            let temp = TempDir::new().unwrap();
            let assets = temp.path().join("assets");
            std::fs::create_dir(&assets).unwrap();
            for i in 0..items {
                std::fs::write(assets.join(format!("{i}.png")), format!("png-bytes-{i}")).unwrap();
                let descriptor = json!({
                    "name": format!("Item #{i}"),
                    "symbol": "TST",
                    "image": format!("{i}.png"),
                    "seller_fee_basis_points": 500,
                    "properties": { "files": [{ "uri": format!("{i}.png"), "type": "image/png" }] }
                });
                std::fs::write(
                    assets.join(format!("{i}.json")),
                    serde_json::to_vec(&descriptor).unwrap(),
                )
                .unwrap();
            }

            let cache = CacheStore::new(temp.path().join(".cache")).file("temp", "devnet");
            Self {
                temp,
                chain: Arc::new(MemoryChain::new()),
                storage: Arc::new(MemoryStorage::new()),
                keys: Arc::new(MemoryKeySource::with_payer(MemoryKeypair::from_seed(b"payer"))),
                cache,
            }
        }

        fn submitter(&self) -> TransactionSubmitter {
            TransactionSubmitter::new(self.chain.clone(), submit_config())
        }

        fn uploader(&self) -> Uploader {
            Uploader::new(
                self.storage.clone(),
                self.submitter(),
                self.keys.clone(),
                self.cache.clone(),
                upload_config(),
                RetryPolicy::from(&submit_config()),
            )
        }

        fn verifier(&self) -> Verifier {
            Verifier::new(self.chain.clone(), self.cache.clone(), VerifyConfig::default())
        }

        async fn files(&self) -> Vec<PathBuf> {
            list_directory(&self.temp.path().join("assets")).await.unwrap()
        }

        async fn upload_with(&self, deployment: serde_json::Value) -> Result<UploadReport, DeployError> {
            let request = UploadRequest {
                files: self.files().await,
                total_items: None,
                deployment: serde_json::from_value::<DeploymentConfig>(deployment).unwrap(),
            };
            self.uploader().run(request).await
        }

        async fn upload(&self) -> Result<UploadReport, DeployError> {
            self.upload_with(deployment()).await
        }
    }

    fn deployment() -> serde_json::Value {
        json!({
            "storage": { "type": "arweave" },
            "price": 0.1,
            "treasuryWallet": "Treasury111"
        })
    }

    fn rejects_chunk_at(
        start: u32,
    ) -> impl Fn(&candy_deploy::chain::Transaction) -> Option<String> + Send + Sync + 'static {
        move |tx| {
            tx.instructions.iter().find_map(|ix| match ix {
                Instruction::AddConfigLines { index, .. } if *index == start => {
                    Some("custom program error: 0x1".to_string())
                }
                _ => None,
            })
        }
    }

    #[tokio::test]
    async fn full_deployment_verifies() {
        let h = Harness::new(3);

        let report = h.upload().await.unwrap();
        assert!(report.created);
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.lines_written, 3);
        assert_eq!(report.chunks_written, 2);
        assert_eq!(h.storage.upload_count(), 6);

        let data = h.chain.account_data(&report.candy_machine).unwrap();
        assert_eq!(ledger::line_count(&data).unwrap(), 3);
        assert_eq!(
            ledger::decode_line(&data, 2).unwrap(),
            ConfigLine::new("Item #2", &h.cache.load().await.unwrap().item(2).unwrap().link)
        );

        let verified = h.verifier().run().await.unwrap();
        assert_eq!(verified.checked, 3);
        let summary = h.cache.load().await.unwrap().summary();
        assert_eq!((summary.uploaded, summary.on_chain, summary.verified), (3, 3, 3));
    }

    #[tokio::test]
    async fn rerun_after_success_does_nothing() {
        let h = Harness::new(3);
        let first = h.upload().await.unwrap();
        let uploads = h.storage.upload_count();
        let txs = h.chain.committed_count();

        let second = h.upload().await.unwrap();
        assert!(!second.created);
        assert_eq!(second.candy_machine, first.candy_machine);
        assert_eq!((second.uploaded, second.skipped), (0, 3));
        assert_eq!(second.lines_written, 0);
        assert_eq!(h.storage.upload_count(), uploads);
        assert_eq!(h.chain.committed_count(), txs);
    }

    #[tokio::test]
    async fn failed_chunk_is_written_on_rerun() {
        let h = Harness::new(5);
        h.chain.reject_when(rejects_chunk_at(2));

        let err = h.upload().await.unwrap_err();
        match err {
            DeployError::PartialUploadFailure {
                failed_uploads,
                failed_chunks,
                failed_indices,
            } => {
                assert_eq!((failed_uploads, failed_chunks), (0, 1));
                assert_eq!(failed_indices, vec![2, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let cache = h.cache.load().await.unwrap();
        let on_chain: Vec<u32> = cache
            .items
            .iter()
            .filter(|(_, item)| item.on_chain)
            .map(|(index, _)| *index)
            .collect();
        assert_eq!(on_chain, vec![0, 1, 4]);
        assert_eq!(cache.summary().uploaded, 5);

        h.chain.clear_rejections();
        let uploads = h.storage.upload_count();
        let report = h.upload().await.unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!((report.chunks_written, report.lines_written), (1, 2));
        assert_eq!(h.storage.upload_count(), uploads);

        h.verifier().run().await.unwrap();
    }

    #[tokio::test]
    async fn failed_upload_is_retried_on_rerun() {
        let h = Harness::new(3);
        h.storage.fail_file("1.png", true);

        let err = h.upload().await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::PartialUploadFailure { failed_uploads: 1, ref failed_indices, .. }
                if failed_indices == &vec![1]
        ));
        let cache = h.cache.load().await.unwrap();
        assert!(!cache.item(1).is_some_and(|item| item.is_uploaded()));
        assert!(cache.is_created());

        let data = h.chain.account_data(cache.program.candy_machine.as_ref().unwrap()).unwrap();
        assert_eq!(ledger::line_count(&data).unwrap(), 3);
        let err = h.verifier().run().await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::VerificationFailed { missing: 1, ref failed_indices, .. }
                if failed_indices == &vec![1]
        ));

        h.storage.clear_failures();
        let report = h.upload().await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.lines_written, 1);
        h.verifier().run().await.unwrap();
    }

    #[tokio::test]
    async fn transient_submit_errors_are_absorbed() {
        let h = Harness::new(2);
        h.chain.fail_next_submissions(2);

        let report = h.upload().await.unwrap();
        assert_eq!(report.lines_written, 2);
        h.verifier().run().await.unwrap();
    }

    fn machines_initialized(chain: &MemoryChain) -> usize {
        chain
            .committed_transactions()
            .iter()
            .flat_map(|tx| tx.instructions.iter())
            .filter(|ix| matches!(ix, Instruction::InitializeCandyMachine { .. }))
            .count()
    }

    #[tokio::test]
    async fn lost_creation_confirmation_keeps_one_machine() {
        let h = Harness::new(3);
        h.chain.hide_next_confirmations(1, u32::MAX);

        let report = h.upload().await.unwrap();
        assert!(report.created);
        assert_eq!(report.lines_written, 3);
        assert_eq!(machines_initialized(&h.chain), 1);

        let cache = h.cache.load().await.unwrap();
        assert_eq!(cache.program.candy_machine, Some(report.candy_machine.clone()));
        assert_eq!(cache.program.pending_candy_machine, None);

        let rerun = h.upload().await.unwrap();
        assert!(!rerun.created);
        assert_eq!(rerun.candy_machine, report.candy_machine);
        assert_eq!(machines_initialized(&h.chain), 1);
        h.verifier().run().await.unwrap();
    }

    #[tokio::test]
    async fn rerun_adopts_pending_machine_found_on_chain() {
        let h = Harness::new(3);
        let first = h.upload().await.unwrap();

        // state as left by a crash between sending the creation and saving it
        let mut cache = h.cache.load().await.unwrap();
        cache.program = ProgramInfo {
            pending_candy_machine: Some(first.candy_machine.clone()),
            ..ProgramInfo::default()
        };
        for item in cache.items.values_mut() {
            item.on_chain = false;
            item.verify_run = false;
        }
        h.cache.save(&cache).await.unwrap();

        let report = h.upload().await.unwrap();
        assert!(!report.created);
        assert_eq!(report.candy_machine, first.candy_machine);
        assert_eq!(report.lines_written, 3);
        assert_eq!(machines_initialized(&h.chain), 1);
        h.verifier().run().await.unwrap();
    }

    #[tokio::test]
    async fn pending_machine_missing_on_chain_is_replaced() {
        let h = Harness::new(2);
        let mut cache = candy_deploy::cache::Cache::default();
        cache.program.pending_candy_machine = Some(Address::new("NeverLanded111"));
        h.cache.save(&cache).await.unwrap();

        let report = h.upload().await.unwrap();
        assert!(report.created);
        assert_ne!(report.candy_machine, Address::new("NeverLanded111"));
        assert_eq!(machines_initialized(&h.chain), 1);
    }

    #[tokio::test]
    async fn corrupted_line_is_flagged_and_rewritten() {
        let h = Harness::new(3);
        let report = h.upload().await.unwrap();
        h.chain
            .corrupt_line(
                &report.candy_machine,
                1,
                &ConfigLine::new("Item #1", "https://example.com/tampered"),
            )
            .unwrap();

        let err = h.verifier().run().await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::VerificationFailed { mismatched: 1, malformed: 0, missing: 0, ref failed_indices }
                if failed_indices == &vec![1]
        ));
        let cache = h.cache.load().await.unwrap();
        assert!(!cache.item(1).unwrap().on_chain);
        assert!(cache.item(0).unwrap().verify_run);

        let rerun = h.upload().await.unwrap();
        assert_eq!((rerun.uploaded, rerun.lines_written), (0, 1));

        let verified = h.verifier().run().await.unwrap();
        assert_eq!((verified.checked, verified.already_verified), (1, 2));
    }

    #[tokio::test]
    async fn larger_machine_is_incomplete_until_filled() {
        let h = Harness::new(3);
        let mut deployment = deployment();
        deployment["number"] = json!(5);

        let report = h.upload_with(deployment).await.unwrap();
        assert_eq!(report.lines_written, 3);

        let err = h.verifier().run().await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::IncompleteDeployment { written: 3, expected: 5 }
        ));
    }

    #[tokio::test]
    async fn fewer_items_than_pairs_is_rejected() {
        let h = Harness::new(3);
        let mut deployment = deployment();
        deployment["number"] = json!(2);

        let err = h.upload_with(deployment).await.unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
        assert_eq!(h.storage.upload_count(), 0);
        assert_eq!(h.chain.committed_count(), 0);
    }

    #[tokio::test]
    async fn hidden_settings_skip_config_lines() {
        let h = Harness::new(2);
        let mut deployment = deployment();
        deployment["hiddenSettings"] = json!({
            "name": "Mystery #",
            "uri": "https://arweave.net/placeholder",
            "hash": "0123456789abcdef0123456789abcdef"
        });

        let report = h.upload_with(deployment).await.unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!((report.chunks_written, report.lines_written), (0, 0));

        let data = h.chain.account_data(&report.candy_machine).unwrap();
        assert_eq!(data.len(), ledger::account_size(2, true));

        let err = h.verifier().run().await.unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[tokio::test]
    async fn mint_until_sold_out() {
        let h = Harness::new(2);
        h.upload().await.unwrap();

        let minter = Minter::new(h.submitter(), h.keys.clone(), h.cache.clone());
        let err = minter.mint_many(3).await.unwrap_err();
        match err {
            DeployError::MintIncomplete {
                minted, requested, ..
            } => assert_eq!((minted, requested), (2, 3)),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.chain.minted().len(), 2);
    }

    #[tokio::test]
    async fn local_storage_deployment() {
        let h = Harness::new(2);
        let objects = h.temp.path().join("objects");
        let deployment: DeploymentConfig = serde_json::from_value(json!({
            "storage": { "type": "local", "dir": objects },
            "price": 0,
            "treasuryWallet": "Treasury111"
        }))
        .unwrap();

        let uploader = Uploader::new(
            storage::for_config(&deployment.storage).unwrap(),
            h.submitter(),
            h.keys.clone(),
            h.cache.clone(),
            upload_config(),
            RetryPolicy::from(&submit_config()),
        );
        let request = UploadRequest {
            files: h.files().await,
            total_items: None,
            deployment,
        };
        let report = uploader.run(request).await.unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(std::fs::read_dir(&objects).unwrap().count(), 4);

        let cache = h.cache.load().await.unwrap();
        let link = &cache.item(0).unwrap().link;
        assert!(link.starts_with("file://"));
        h.verifier().run().await.unwrap();
    }
}
