//! Job state reconciliation.
//!
//! [`apply`] is the single merge function for job state. Every field of a
//! [`JobView`] remembers the stamp that last wrote it and only accepts a
//! value carried by an update stamped at or after that point, so a stale
//! message can win some fields and lose others. Terminal states are
//! absorbing for everything except the metrics history.
//!
//! [`JobLedger`] keeps recent updates in stamp order so that a late arrival
//! is folded at its proper position rather than on top of newer state.

use crate::job::{ControlAck, Job, JobHandle, JobId, JobStatus, Metrics};
use crate::sequence::Stamp;
use crate::telemetry::{EventKind, ResourceUsage, TelemetryEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// A value plus the stamp of the update that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stamped<T> {
    pub value: T,
    pub stamp: Stamp,
}

impl<T> Stamped<T> {
    fn initial(value: T) -> Self {
        Self { value, stamp: Stamp::ZERO }
    }

    /// Write `value` unless this field was already written by a newer update.
    fn offer(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp < self.stamp {
            return false;
        }
        self.value = value;
        self.stamp = stamp;
        true
    }
}

impl<T> Stamped<Option<T>> {
    fn offer_some(&mut self, value: Option<T>, stamp: Stamp) -> bool {
        match value {
            Some(v) => self.offer(Some(v), stamp),
            None => false,
        }
    }
}

/// One entry of the metrics history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPoint {
    pub stamp: Stamp,
    pub epoch: Option<u32>,
    pub metrics: Metrics,
    /// Final evaluation recorded at completion.
    pub is_final: bool,
}

/// The merged, read-only view of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: Stamped<JobStatus>,
    pub progress: Stamped<u8>,
    pub epoch: Stamped<Option<u32>>,
    pub total_epochs: Stamped<Option<u32>>,
    pub metrics: Stamped<Metrics>,
    pub result: Stamped<Option<serde_json::Value>>,
    pub error: Stamped<Option<String>>,
    pub message: Stamped<Option<String>>,
    pub resource_usage: Stamped<Option<ResourceUsage>>,
    pub elapsed_secs: Stamped<Option<f64>>,
    pub created_at: Stamped<Option<DateTime<Utc>>>,
    pub completed_at: Stamped<Option<DateTime<Utc>>>,
    pub history: Vec<MetricsPoint>,
    /// Newest stamp folded into this view.
    pub last_stamp: Stamp,
}

impl JobView {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: Stamped::initial(JobStatus::Created),
            progress: Stamped::initial(0),
            epoch: Stamped::initial(None),
            total_epochs: Stamped::initial(None),
            metrics: Stamped::initial(Metrics::new()),
            result: Stamped::initial(None),
            error: Stamped::initial(None),
            message: Stamped::initial(None),
            resource_usage: Stamped::initial(None),
            elapsed_secs: Stamped::initial(None),
            created_at: Stamped::initial(None),
            completed_at: Stamped::initial(None),
            history: Vec::new(),
            last_stamp: Stamp::ZERO,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.value.is_terminal()
    }

    /// Plain job record. `result` only when completed, `error` only when errored.
    pub fn to_job(&self) -> Job {
        let status = self.status.value;
        Job {
            id: self.job_id.clone(),
            status,
            progress: Some(self.progress.value),
            epoch: self.epoch.value,
            total_epochs: self.total_epochs.value,
            metrics: self.metrics.value.clone(),
            result: if status == JobStatus::Completed { self.result.value.clone() } else { None },
            error: if status == JobStatus::Error { self.error.value.clone() } else { None },
            message: self.message.value.clone(),
            created_at: self.created_at.value,
            completed_at: self.completed_at.value,
        }
    }

    fn record_history(&mut self, stamp: Stamp, epoch: Option<u32>, metrics: &Metrics, is_final: bool) {
        if metrics.is_empty() {
            return;
        }
        let duplicate = self.history.iter().any(|p| {
            if is_final || p.is_final {
                p.is_final == is_final
            } else {
                match epoch {
                    Some(_) => p.epoch == epoch,
                    None => p.epoch.is_none() && &p.metrics == metrics,
                }
            }
        });
        if duplicate {
            return;
        }
        let idx = self.history.partition_point(|p| p.stamp <= stamp);
        self.history.insert(idx, MetricsPoint { stamp, epoch, metrics: metrics.clone(), is_final });
    }
}

/// Response of a control call, stamped when the call completed.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlBody {
    Started(JobHandle),
    Ack(ControlAck),
    Snapshot(Job),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Telemetry(TelemetryEvent),
    Control { stamp: Stamp, completed_at: DateTime<Utc>, body: ControlBody },
}

impl Update {
    pub fn stamp(&self) -> Stamp {
        match self {
            Self::Telemetry(event) => event.seq,
            Self::Control { stamp, .. } => *stamp,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Telemetry(event) => &event.job_id,
            Self::Control { body: ControlBody::Started(h), .. } => &h.job_id,
            Self::Control { body: ControlBody::Ack(a), .. } => &a.job_id,
            Self::Control { body: ControlBody::Snapshot(j), .. } => &j.id,
        }
    }
}

/// Fields an update proposes, flattened out of its source shape.
#[derive(Debug, Default)]
struct Patch {
    status: Option<JobStatus>,
    progress: Option<u8>,
    epoch: Option<u32>,
    total_epochs: Option<u32>,
    metrics: Option<Metrics>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    message: Option<String>,
    resource_usage: Option<ResourceUsage>,
    elapsed_secs: Option<f64>,
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    /// Carries the completion payload; never touches history once terminal.
    completes: bool,
}

/// Numeric top-level fields of a result payload.
fn result_metrics(result: &serde_json::Value) -> Metrics {
    result
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, v)| v.is_number() && k.as_str() != "training_time")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

impl Patch {
    fn from_update(update: &Update) -> Self {
        match update {
            Update::Telemetry(event) => Self::from_event(event),
            Update::Control { completed_at, body, .. } => Self::from_control(body, *completed_at),
        }
    }

    fn from_event(event: &TelemetryEvent) -> Self {
        match &event.kind {
            EventKind::Connected { .. } => Self::default(),
            EventKind::Progress {
                progress,
                epoch,
                total_epochs,
                metrics,
                resource_usage,
                elapsed_secs,
                message,
            } => Self {
                progress: *progress,
                epoch: *epoch,
                total_epochs: *total_epochs,
                metrics: metrics.clone(),
                resource_usage: resource_usage.clone(),
                elapsed_secs: *elapsed_secs,
                message: message.clone(),
                ..Self::default()
            },
            EventKind::Complete { result, elapsed_secs, message } => Self {
                status: Some(JobStatus::Completed),
                progress: Some(100),
                metrics: result.as_ref().map(result_metrics).filter(|m| !m.is_empty()),
                result: result.clone(),
                elapsed_secs: *elapsed_secs,
                message: message.clone(),
                completed_at: Some(event.received_at),
                completes: true,
                ..Self::default()
            },
            EventKind::Error { error, message, cancelled } => Self {
                status: Some(if *cancelled { JobStatus::Stopped } else { JobStatus::Error }),
                error: (!cancelled).then(|| error.clone()),
                message: message.clone(),
                completed_at: Some(event.received_at),
                ..Self::default()
            },
            EventKind::Status { status, progress, message } => Self {
                status: Some(*status),
                progress: *progress,
                message: message.clone(),
                ..Self::default()
            },
        }
    }

    fn from_control(body: &ControlBody, completed_at: DateTime<Utc>) -> Self {
        match body {
            ControlBody::Started(handle) => Self {
                status: Some(handle.status),
                message: handle.message.clone(),
                created_at: Some(completed_at),
                ..Self::default()
            },
            ControlBody::Ack(ack) => Self {
                status: Some(ack.status),
                message: ack.message.clone(),
                ..Self::default()
            },
            ControlBody::Snapshot(job) => Self {
                status: Some(job.status),
                progress: job.progress,
                epoch: job.epoch,
                total_epochs: job.total_epochs,
                metrics: (!job.metrics.is_empty()).then(|| job.metrics.clone()),
                result: job.result.clone(),
                error: job.error.clone(),
                message: job.message.clone(),
                created_at: job.created_at,
                completed_at: job.completed_at,
                completes: job.status == JobStatus::Completed,
                ..Self::default()
            },
        }
    }
}

/// Merge one update into a view, producing the next view.
///
/// Only commutative for updates delivered in stamp order: a late update
/// that lands after a terminal one is dropped, so applying complete(#3)
/// then progress(#2) loses the epoch that in-order delivery keeps. Feed
/// updates through [`JobLedger`] when arrival order is not guaranteed.
pub fn apply(view: &JobView, update: &Update) -> JobView {
    let stamp = update.stamp();
    let patch = Patch::from_update(update);
    let mut next = view.clone();
    next.last_stamp = next.last_stamp.max(stamp);

    if view.is_terminal() {
        if !patch.completes {
            if let Some(metrics) = &patch.metrics {
                next.record_history(stamp, patch.epoch, metrics, false);
            }
        }
        debug!(job_id = %view.job_id, %stamp, status = %view.status.value, "update after terminal state ignored");
        return next;
    }

    let status_changed = patch.status.is_some_and(|s| s != view.status.value);
    if let Some(status) = patch.status {
        if !next.status.offer(status, stamp) {
            debug!(job_id = %view.job_id, %stamp, "stale status discarded");
        }
    }

    if let Some(progress) = patch.progress {
        let restarted = status_changed && patch.status.is_some_and(JobStatus::is_retry);
        if progress >= view.progress.value || restarted {
            next.progress.offer(progress.min(100), stamp);
        } else {
            debug!(
                job_id = %view.job_id,
                %stamp,
                current = view.progress.value,
                incoming = progress,
                "progress regression discarded"
            );
        }
    }

    next.epoch.offer_some(patch.epoch, stamp);
    next.total_epochs.offer_some(patch.total_epochs, stamp);
    if let Some(metrics) = &patch.metrics {
        next.metrics.offer(metrics.clone(), stamp);
        next.record_history(stamp, patch.epoch, metrics, patch.completes);
    }
    next.result.offer_some(patch.result, stamp);
    next.error.offer_some(patch.error, stamp);
    next.message.offer_some(patch.message, stamp);
    next.resource_usage.offer_some(patch.resource_usage, stamp);
    next.elapsed_secs.offer_some(patch.elapsed_secs, stamp);
    next.created_at.offer_some(patch.created_at, stamp);
    next.completed_at.offer_some(patch.completed_at, stamp);

    if next.is_terminal() {
        info!(job_id = %next.job_id, status = %next.status.value, %stamp, "job reached terminal state");
    }
    next
}

/// Default number of updates retained for in-order refolding.
pub const DEFAULT_LEDGER_CAPACITY: usize = 4096;

/// Stamp-ordered update log for one job.
///
/// Updates arriving at the tail are applied directly. A late update that
/// still falls inside the retained window is inserted at its position and
/// the window is refolded. Older updates are merged into the compacted base
/// with the per-field guard.
#[derive(Debug, Clone)]
pub struct JobLedger {
    base: JobView,
    entries: Vec<Update>,
    view: JobView,
    capacity: usize,
}

impl JobLedger {
    pub fn new(job_id: JobId) -> Self {
        Self::with_capacity(job_id, DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(job_id: JobId, capacity: usize) -> Self {
        let base = JobView::new(job_id);
        Self { view: base.clone(), base, entries: Vec::new(), capacity: capacity.max(1) }
    }

    pub fn view(&self) -> &JobView {
        &self.view
    }

    /// Fold `update` in. Returns whether the view changed.
    pub fn push(&mut self, update: Update) -> bool {
        let stamp = update.stamp();
        let before = self.view.clone();

        if stamp <= self.base.last_stamp && self.base.last_stamp > Stamp::ZERO {
            debug!(job_id = %self.view.job_id, %stamp, "update older than retained window");
            self.base = apply(&self.base, &update);
            self.refold();
            return self.view != before;
        }

        match self.entries.binary_search_by_key(&stamp, Update::stamp) {
            Ok(_) => {
                debug!(job_id = %self.view.job_id, %stamp, "duplicate update ignored");
                return false;
            }
            Err(idx) if idx == self.entries.len() => {
                self.view = apply(&self.view, &update);
                self.entries.push(update);
            }
            Err(idx) => {
                debug!(job_id = %self.view.job_id, %stamp, behind = self.entries.len() - idx, "late update refolded");
                self.entries.insert(idx, update);
                self.refold();
            }
        }

        self.compact();
        self.view != before
    }

    fn refold(&mut self) {
        self.view = self.entries.iter().fold(self.base.clone(), |view, update| apply(&view, update));
    }

    fn compact(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let overflow = self.entries.len() - self.capacity;
        for update in self.entries.drain(..overflow) {
            self.base = apply(&self.base, &update);
        }
    }
}
