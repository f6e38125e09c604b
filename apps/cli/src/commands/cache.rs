//! Local preprocessing-step cache maintenance.

use super::Context;
use super::types::CacheCommand;
use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use trainsync_core::{CacheError, CacheStore, RestoreOutcome, StepRestorer, SyncError};

pub async fn execute(ctx: &Context, command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::List { json } => list(ctx, json).await,
        CacheCommand::Reconcile { json } => reconcile(ctx, json).await,
        CacheCommand::Restore { dataset_id, step } => restore(ctx, &dataset_id, step.as_deref()).await,
    }
}

async fn list(ctx: &Context, json: bool) -> Result<()> {
    let (store, report) = ctx.reconciled_cache().await?;
    let keys = store.keys().map_err(SyncError::from)?;

    let mut records = Vec::new();
    let mut corrupted = Vec::new();
    for key in keys {
        match store.get(&key) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(CacheError::Corrupted { key, reason }) => corrupted.push((key, reason)),
            Err(e) => return Err(SyncError::from(e).into()),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{} ({})", "Step cache".bold().cyan(), ctx.config.cache_path.display());
    if records.is_empty() && corrupted.is_empty() {
        println!("  {}", "empty".dimmed());
    }
    for record in &records {
        println!(
            "  {:<32} step #{} {} {}",
            record.key().to_string().bold(),
            record.step_id,
            record.methods.join(",").cyan(),
            record.remote_created_at.to_rfc3339().dimmed()
        );
    }
    for (key, reason) in &corrupted {
        println!("  {:<32} {}", key.to_string().red(), format!("corrupted: {reason}").dimmed());
    }
    if !report.is_noop() {
        println!("{}", format!("{} stale entr(ies) dropped before listing", report.deleted()).dimmed());
    }
    for (dataset_id, reason) in report.unchecked.iter().chain(&report.failed) {
        println!("  {} {} ({})", "unverified".yellow(), dataset_id, reason.dimmed());
    }
    Ok(())
}

async fn reconcile(ctx: &Context, json: bool) -> Result<()> {
    let (_, report) = ctx.reconciled_cache().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_noop() && report.unchecked.is_empty() && report.failed.is_empty() {
        println!("{}", "Cache is consistent.".green());
    }
    for key in &report.corrupted {
        println!("  {} {}", "dropped corrupted".yellow(), key);
    }
    for key in &report.removed {
        println!("  {} {}", "dropped stale".yellow(), key);
    }
    for (dataset_id, reason) in &report.unchecked {
        println!("  {} {} ({})", "kept unchecked".red(), dataset_id, reason.dimmed());
    }
    for (dataset_id, reason) in &report.failed {
        println!("  {} {} ({})", "could not clear".red(), dataset_id, reason.dimmed());
    }
    if !report.is_noop() {
        println!("{} {} entr(ies) removed", "Done:".bold(), report.deleted());
    }
    Ok(())
}

async fn restore(ctx: &Context, dataset_id: &str, step: Option<&str>) -> Result<()> {
    let (store, _) = ctx.reconciled_cache().await?;
    let restorer = StepRestorer::new(store, Arc::new(ctx.registry()?));
    let outcomes = match step {
        Some(step_type) => vec![(step_type.to_string(), restorer.restore(dataset_id, step_type).await?)],
        None => restorer.restore_all(dataset_id).await?,
    };

    if outcomes.is_empty() {
        println!("{}", format!("No preprocessing history for {dataset_id}.").dimmed());
    }
    for (step_type, outcome) in outcomes {
        match outcome {
            RestoreOutcome::Written(record) => {
                println!("  {:<20} {} (step #{})", step_type.bold(), "restored".green(), record.step_id);
            }
            RestoreOutcome::Unchanged => println!("  {:<20} {}", step_type.bold(), "up to date".dimmed()),
            RestoreOutcome::NothingToRestore => {
                println!("  {:<20} {}", step_type.bold(), "no successful run".yellow());
            }
        }
    }
    Ok(())
}
