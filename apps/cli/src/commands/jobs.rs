//! Job lifecycle commands: train, status, pause/resume/stop, health.

use super::Context;
use super::render;
use super::types::TrainArgs;
use anyhow::{Result, bail};
use colored::Colorize;
use trainsync_core::{
    ControlAction, JobControl, JobId, JobTracker, ModelFamily, SequenceClock, SyncError, TrainingJobSpec,
};

/// `key=value`; the value is read as JSON when possible, otherwise kept as a string.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!(SyncError::InvalidInput(format!("parameter '{raw}' must look like key=value")));
    };
    let key = key.trim();
    if key.is_empty() {
        bail!(SyncError::InvalidInput(format!("parameter '{raw}' has an empty key")));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}

pub async fn train(ctx: &Context, args: TrainArgs) -> Result<()> {
    let mut spec = TrainingJobSpec::new(&args.dataset, &args.model, &args.target, &args.task);
    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        spec = spec.with_param(key, value);
    }
    // Fail locally before building any client.
    spec.validate()?;

    let api = ctx.jobs()?;
    ctx.enter_dataset(&args.dataset).await;
    let handle = api.start(&spec).await?;
    println!(
        "{} {} ({})",
        "Started job".green(),
        handle.job_id.to_string().bold(),
        render::status_label(handle.status)
    );
    if let Some(message) = &handle.message {
        println!("  {}", message.dimmed());
    }

    if args.watch {
        super::watch::execute(ctx, &[handle.job_id.to_string()], false).await?;
    }
    Ok(())
}

pub async fn status(ctx: &Context, job_id: &str, json: bool) -> Result<()> {
    let api = ctx.jobs()?;
    let job_id = JobId::new(job_id);
    let mut tracker = JobTracker::new(SequenceClock::new(), ctx.config.request_timeout);
    let view = tracker.refresh(&api, &job_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view.to_job())?);
    } else {
        render::summary(&view);
    }
    Ok(())
}

pub async fn control(ctx: &Context, job_id: &str, action: ControlAction) -> Result<()> {
    let api = ctx.jobs()?;
    let job_id = JobId::new(job_id);
    let mut tracker = JobTracker::new(SequenceClock::new(), ctx.config.request_timeout);
    tracker.track(&job_id);
    let view = tracker.control(&api, &job_id, action).await?;

    println!(
        "{} {} -> {}",
        action.to_string().bold(),
        job_id,
        render::status_label(view.status.value)
    );
    if let Some(message) = &view.message.value {
        println!("  {}", message.dimmed());
    }
    Ok(())
}

pub async fn health(ctx: &Context) -> Result<()> {
    let report = ctx.jobs()?.health().await?;
    let label = if report.is_healthy() { report.status.green() } else { report.status.red() };
    println!("{} {} ({})", "Service".bold(), label, ctx.config.base_url);
    for (name, state) in &report.services {
        let state = state.as_str().map_or_else(|| state.to_string(), str::to_string);
        println!("  {name}: {state}");
    }
    if !report.is_healthy() {
        bail!(SyncError::ServiceUnavailable(format!("service reports '{}'", report.status)));
    }
    Ok(())
}

pub fn models() {
    println!("{}", "Supported models".bold().cyan());
    for alias in ModelFamily::supported_aliases() {
        if let Ok(family) = ModelFamily::resolve(&alias) {
            if family.canonical_alias() == alias {
                println!("  {:<16} {}", alias.bold(), family.display_name().dimmed());
            } else {
                println!("  {:<16} {}", alias, format!("alias of {}", family.canonical_alias()).dimmed());
            }
        }
    }
}
