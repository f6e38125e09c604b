//! Human-readable rendering of job views.

use colored::{ColoredString, Colorize};
use trainsync_core::{JobStatus, JobView, Metrics};

pub fn status_label(status: JobStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        JobStatus::Completed => label.green().bold(),
        JobStatus::Error => label.red().bold(),
        JobStatus::Stopped => label.yellow().bold(),
        JobStatus::Paused => label.yellow(),
        JobStatus::Running => label.cyan(),
        JobStatus::Created | JobStatus::Queued => label.dimmed(),
    }
}

fn progress_bar(progress: u8) -> String {
    const WIDTH: usize = 20;
    let filled = usize::from(progress.min(100)) * WIDTH / 100;
    format!("[{}{}] {:>3}%", "#".repeat(filled), "-".repeat(WIDTH - filled), progress)
}

pub fn metrics_inline(metrics: &Metrics) -> String {
    metrics
        .iter()
        .map(|(name, value)| match value.as_f64() {
            Some(v) => format!("{name}={v:.4}"),
            None => format!("{name}={value}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One line per update, used while watching.
pub fn line(view: &JobView) -> String {
    let mut out = format!(
        "{} {:<9} {}",
        format!("[{}]", view.job_id).bold(),
        status_label(view.status.value),
        progress_bar(view.progress.value)
    );
    if let (Some(epoch), Some(total)) = (view.epoch.value, view.total_epochs.value) {
        out.push_str(&format!("  epoch {epoch}/{total}"));
    }
    if !view.metrics.value.is_empty() {
        out.push_str(&format!("  {}", metrics_inline(&view.metrics.value).dimmed()));
    }
    if let Some(usage) = &view.resource_usage.value {
        out.push_str(&format!("  cpu {:.0}% ram {:.1}G", usage.cpu, usage.ram).dimmed().to_string());
    }
    if let Some(message) = &view.message.value {
        out.push_str(&format!("  {}", message.dimmed()));
    }
    out
}

/// Multi-line summary, used by `status` and after a watch ends.
pub fn summary(view: &JobView) {
    let job = view.to_job();
    println!("{}", format!("Job {}", job.id).bold().cyan());
    println!("  Status:   {}", status_label(job.status));
    println!("  Progress: {}", progress_bar(job.progress.unwrap_or(0)));
    if let (Some(epoch), Some(total)) = (job.epoch, job.total_epochs) {
        println!("  Epoch:    {epoch}/{total}");
    }
    if let Some(created) = job.created_at {
        println!("  Created:  {}", created.to_rfc3339());
    }
    if let Some(completed) = job.completed_at {
        println!("  Finished: {}", completed.to_rfc3339());
    }
    if !job.metrics.is_empty() {
        println!("  Metrics:  {}", metrics_inline(&job.metrics));
    }
    if let Some(error) = &job.error {
        println!("  Error:    {}", error.red());
    }
    if let Some(message) = &job.message {
        println!("  Message:  {}", message.dimmed());
    }
    if !view.history.is_empty() {
        println!("  History:  {} point(s)", view.history.len());
    }
}
