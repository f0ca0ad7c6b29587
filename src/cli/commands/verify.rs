//! Verify command - compare config lines on chain with the cache

use super::Target;
use crate::chain::RpcChainClient;
use crate::cli::args::VerifyArgs;
use crate::config::Settings;
use crate::error::{DeployError, DeployResult};
use crate::ui::{self, TaskSpinner, UiContext};
use crate::verify::Verifier;
use std::sync::Arc;
use std::time::Duration;

/// Execute the verify command
pub async fn execute(args: VerifyArgs, settings: &Settings, target: &Target) -> DeployResult<()> {
    let ctx = UiContext::detect();
    let url = match args.rpc_url {
        Some(url) => url,
        None => settings
            .rpc
            .endpoint(&target.env)
            .map(str::to_string)
            .ok_or_else(|| {
                DeployError::config(format!(
                    "no RPC endpoint configured for {}; pass --rpc-url",
                    target.env
                ))
            })?,
    };

    let chain = RpcChainClient::new(
        url,
        Duration::from_secs(settings.rpc.request_timeout_secs),
    );
    let verifier = Verifier::new(
        Arc::new(chain),
        target.cache.clone(),
        settings.verify.clone(),
    );

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Verifying config lines...");
    match verifier.run().await {
        Ok(report) => {
            spinner.stop("Verification complete");
            if report.checked == 0 {
                ui::step_ok(&ctx, "All items were verified by an earlier run");
            } else {
                ui::step_ok_detail(
                    &ctx,
                    &format!(
                        "{} item(s) checked, {} verified earlier",
                        report.checked, report.already_verified
                    ),
                    report.candy_machine.as_str(),
                );
            }
            ui::key_value(
                &ctx,
                "config lines",
                &format!("{}/{}", report.line_count, report.items_available),
            );
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Verification failed");
            match &e {
                DeployError::VerificationFailed { failed_indices, .. } => {
                    let shown: Vec<String> =
                        failed_indices.iter().take(20).map(u32::to_string).collect();
                    ui::step_error(&ctx, &format!("failed items: {}", shown.join(", ")));
                }
                DeployError::IncompleteDeployment { written, expected } => {
                    ui::step_error(
                        &ctx,
                        &format!("{} of {} config lines written", written, expected),
                    );
                }
                _ => {}
            }
            Err(e)
        }
    }
}
