//! Status command - summarize a deployment from its cache

use super::Target;
use crate::cache::Cache;
use crate::cli::args::{OutputFormat, StatusArgs};
use crate::error::DeployResult;
use crate::ui::{self, UiContext};
use console::style;
use serde_json::json;

/// Execute the status command
pub async fn execute(args: StatusArgs, target: &Target) -> DeployResult<()> {
    let cache = target.cache.load().await?;

    match args.format {
        OutputFormat::Table => print_table(&cache, target),
        OutputFormat::Json => print_json(&cache, target)?,
    }
    Ok(())
}

fn print_table(cache: &Cache, target: &Target) {
    let ctx = UiContext::detect();
    let summary = cache.summary();
    let program = &cache.program;
    let expected = program.items_available as usize;

    println!(
        "{}",
        style(format!("Deployment {}", target.cache.path().display()))
            .bold()
            .cyan()
    );

    ui::section(&ctx, "Candy machine");
    match &program.candy_machine {
        Some(address) => {
            ui::key_value(&ctx, "address", address.as_str());
            ui::key_value(&ctx, "uuid", &program.uuid);
            ui::key_value(&ctx, "items available", &program.items_available.to_string());
            ui::key_value(&ctx, "price", &program.price.to_string());
            if let Some(created) = program.created_at {
                ui::key_value(&ctx, "created", &created.to_rfc3339());
            }
            if program.hidden_settings {
                ui::step_info(&ctx, "hidden settings: no config lines are written");
            }
        }
        None => ui::step_warn_hint(&ctx, "not created yet", "run the upload"),
    }

    ui::section(&ctx, "Items");
    let target_count = expected.max(summary.total);
    ui::key_value_status(
        &ctx,
        "uploaded",
        &format!("{}/{}", summary.uploaded, target_count),
        summary.uploaded >= target_count,
    );
    if !program.hidden_settings {
        ui::key_value_status(
            &ctx,
            "on chain",
            &format!("{}/{}", summary.on_chain, target_count),
            summary.on_chain >= target_count,
        );
        ui::key_value_status(
            &ctx,
            "verified",
            &format!("{}/{}", summary.verified, target_count),
            summary.verified >= target_count,
        );
    }

    let pending: Vec<String> = cache
        .items
        .iter()
        .filter(|(_, item)| !item.is_uploaded() || !item.on_chain)
        .map(|(index, _)| index.to_string())
        .take(20)
        .collect();
    if !pending.is_empty() && !program.hidden_settings {
        ui::step_warn(&ctx, &format!("pending: {}", pending.join(", ")));
    }
}

fn print_json(cache: &Cache, target: &Target) -> DeployResult<()> {
    let summary = cache.summary();
    let value = json!({
        "cache": target.cache.path().display().to_string(),
        "env": target.env,
        "candyMachine": cache.program.candy_machine,
        "itemsAvailable": cache.program.items_available,
        "hiddenSettings": cache.program.hidden_settings,
        "items": {
            "total": summary.total,
            "uploaded": summary.uploaded,
            "onChain": summary.on_chain,
            "verified": summary.verified,
        },
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
