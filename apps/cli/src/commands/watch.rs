//! Follow jobs live: telemetry from the hub folded through the tracker.

use super::Context;
use super::render;
use anyhow::Result;
use colored::Colorize;
use std::collections::HashSet;
use tracing::{debug, warn};
use trainsync_client::TelemetryHub;
use trainsync_core::{JobId, JobTracker, JobView, SequenceClock, StreamSignal, SyncError};

fn emit(view: &JobView, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&view.to_job())?);
    } else {
        println!("{}", render::line(view));
    }
    Ok(())
}

pub async fn execute(ctx: &Context, job_ids: &[String], json: bool) -> Result<()> {
    let api = ctx.jobs()?;
    let clock = SequenceClock::new();
    let mut tracker = JobTracker::new(clock.clone(), ctx.config.request_timeout);
    let (mut hub, mut signals) = TelemetryHub::new(&ctx.config.ws_url, clock, ctx.config.reconnect);

    let mut pending: HashSet<JobId> = HashSet::new();
    for raw in job_ids {
        let job_id = JobId::new(raw.as_str());
        tracker.track(&job_id);
        // Open first so nothing published during the snapshot call is missed.
        hub.open(&job_id);
        match tracker.refresh(&api, &job_id).await {
            Ok(view) => emit(&view, json)?,
            Err(err) => warn!(job_id = %job_id, error = %err, "initial snapshot failed"),
        }
        if tracker.view(&job_id).is_some_and(|v| v.is_terminal()) {
            hub.close(&job_id).await;
        } else {
            pending.insert(job_id);
        }
    }

    while !pending.is_empty() {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(StreamSignal::Event(event)) => {
                    let job_id = event.job_id.clone();
                    if !tracker.apply_telemetry(event) {
                        continue;
                    }
                    if let Some(view) = tracker.view(&job_id) {
                        emit(&view, json)?;
                        if view.is_terminal() {
                            hub.close(&job_id).await;
                            pending.remove(&job_id);
                        }
                    }
                }
                Some(StreamSignal::Dropped { job_id, reason }) => {
                    let err = SyncError::StreamDropped { job_id: job_id.to_string(), reason };
                    eprintln!("{} {}", "warning:".yellow().bold(), err);
                    eprintln!("  {} {}", "hint:".yellow(), err.remediation().dimmed());
                    // Settle on the last remote snapshot instead.
                    if let Ok(view) = tracker.refresh(&api, &job_id).await {
                        emit(&view, json)?;
                    }
                    pending.remove(&job_id);
                }
                Some(StreamSignal::Closed { job_id }) => {
                    debug!(job_id = %job_id, "telemetry channel closed");
                    if pending.remove(&job_id) {
                        if let Ok(view) = tracker.refresh(&api, &job_id).await {
                            emit(&view, json)?;
                        }
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }

    hub.close_all().await;
    if !json {
        for raw in job_ids {
            if let Some(view) = tracker.view(&JobId::new(raw.as_str())) {
                println!();
                render::summary(&view);
            }
        }
    }
    Ok(())
}
