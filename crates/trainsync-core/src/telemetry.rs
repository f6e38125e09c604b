//! Telemetry events pushed by the backend over the per-job stream.
//!
//! Wire payloads are JSON objects tagged by `type`. Decoding drops `ping`
//! before anything else sees it; the stream client then stamps each
//! surviving event with a local sequence number.

use crate::error::{SyncError, SyncResult};
use crate::job::{JobId, JobStatus, Metrics, clamp_progress};
use crate::sequence::Stamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host load reported alongside progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub ram: f64,
    #[serde(default)]
    pub gpu: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProgressPayload {
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    epoch: Option<u32>,
    #[serde(default)]
    total_epochs: Option<u32>,
    #[serde(default)]
    metrics: Option<Metrics>,
    #[serde(default)]
    resource_usage: Option<ResourceUsage>,
    #[serde(default)]
    elapsed_time: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CompletePayload {
    #[serde(default)]
    elapsed_time: Option<f64>,
    #[serde(default)]
    results: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    Progress(ProgressPayload),
    Complete(CompletePayload),
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Status {
        status: String,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        message: Option<String>,
    },
    Ping {},
}

/// Decoded, state-carrying telemetry.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Connected {
        message: Option<String>,
    },
    Progress {
        progress: Option<u8>,
        epoch: Option<u32>,
        total_epochs: Option<u32>,
        metrics: Option<Metrics>,
        resource_usage: Option<ResourceUsage>,
        elapsed_secs: Option<f64>,
        message: Option<String>,
    },
    Complete {
        result: Option<serde_json::Value>,
        elapsed_secs: Option<f64>,
        message: Option<String>,
    },
    Error {
        error: String,
        message: Option<String>,
        /// The backend reports user cancellation as an error named `Cancelled`.
        cancelled: bool,
    },
    Status {
        status: JobStatus,
        progress: Option<u8>,
        message: Option<String>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Status { .. } => "status",
        }
    }
}

/// Decode one wire payload. `Ok(None)` means a `ping`, which carries no state.
pub fn decode(text: &str) -> SyncResult<Option<EventKind>> {
    let wire: WireEvent = serde_json::from_str(text)?;
    let kind = match wire {
        WireEvent::Ping {} => return Ok(None),
        WireEvent::Connected { message } => EventKind::Connected { message },
        WireEvent::Progress(p) => EventKind::Progress {
            progress: p.progress.map(clamp_progress),
            epoch: p.epoch,
            total_epochs: p.total_epochs,
            metrics: p.metrics,
            resource_usage: p.resource_usage,
            elapsed_secs: p.elapsed_time,
            message: p.message,
        },
        WireEvent::Complete(c) => EventKind::Complete {
            result: c.results,
            elapsed_secs: c.elapsed_time,
            message: c.message,
        },
        WireEvent::Error { error, message } => {
            let error = error
                .or_else(|| message.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            let cancelled = error.eq_ignore_ascii_case("cancelled");
            EventKind::Error { error, message, cancelled }
        }
        WireEvent::Status { status, progress, message } => {
            let status = JobStatus::from_remote(&status).ok_or_else(|| {
                SyncError::MalformedResponse(format!("unknown job status '{status}'"))
            })?;
            EventKind::Status { status, progress: progress.map(clamp_progress), message }
        }
    };
    Ok(Some(kind))
}

/// A telemetry event after receipt: stamped and attributed to its job.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub job_id: JobId,
    pub seq: Stamp,
    pub received_at: DateTime<Utc>,
    pub kind: EventKind,
}

/// What a stream delivers to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Event(TelemetryEvent),
    /// The channel closed unexpectedly and will not reconnect on its own.
    Dropped { job_id: JobId, reason: String },
    /// The channel was closed on request.
    Closed { job_id: JobId },
}
