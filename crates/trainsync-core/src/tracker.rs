//! Per-job merged views shared by every observer.
//!
//! The tracker is the only writer of job state. Telemetry events arrive
//! already stamped by the stream; control responses are stamped from the
//! same [`SequenceClock`] when the call completes, after passing the job's
//! [`CallGuard`].

use crate::control::{ControlAction, JobControl};
use crate::error::{SyncError, SyncResult};
use crate::job::{JobHandle, JobId};
use crate::reconcile::{ControlBody, DEFAULT_LEDGER_CAPACITY, JobLedger, JobView, Update};
use crate::sequence::SequenceClock;
use crate::telemetry::TelemetryEvent;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Generation number of one control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Call-generation guard for one job.
///
/// A response is admitted only if its call was not abandoned and no newer
/// call has already been admitted.
#[derive(Debug, Default)]
pub struct CallGuard {
    issued: u64,
    settled: u64,
    abandoned: BTreeSet<u64>,
}

impl CallGuard {
    pub fn issue(&mut self) -> Ticket {
        self.issued += 1;
        Ticket(self.issued)
    }

    /// Mark a call whose response must be ignored if it ever arrives.
    pub fn abandon(&mut self, ticket: Ticket) {
        if ticket.0 > self.settled {
            self.abandoned.insert(ticket.0);
        }
    }

    pub fn admit(&mut self, ticket: Ticket) -> bool {
        if self.abandoned.remove(&ticket.0) || ticket.0 < self.settled {
            return false;
        }
        self.settled = ticket.0;
        self.abandoned.retain(|&g| g > ticket.0);
        true
    }
}

struct TrackedJob {
    ledger: JobLedger,
    guard: CallGuard,
    tx: watch::Sender<JobView>,
}

impl TrackedJob {
    fn new(job_id: &JobId, capacity: usize) -> Self {
        let ledger = JobLedger::with_capacity(job_id.clone(), capacity);
        let (tx, _rx) = watch::channel(ledger.view().clone());
        Self { ledger, guard: CallGuard::default(), tx }
    }

    fn push(&mut self, update: Update) -> bool {
        let changed = self.ledger.push(update);
        if changed {
            self.tx.send_replace(self.ledger.view().clone());
        }
        changed
    }
}

pub struct JobTracker {
    clock: SequenceClock,
    jobs: HashMap<JobId, TrackedJob>,
    ledger_capacity: usize,
    call_timeout: Duration,
}

impl JobTracker {
    pub fn new(clock: SequenceClock, call_timeout: Duration) -> Self {
        Self { clock, jobs: HashMap::new(), ledger_capacity: DEFAULT_LEDGER_CAPACITY, call_timeout }
    }

    #[must_use]
    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity;
        self
    }

    pub fn clock(&self) -> &SequenceClock {
        &self.clock
    }

    fn entry(&mut self, job_id: &JobId) -> &mut TrackedJob {
        let capacity = self.ledger_capacity;
        self.jobs
            .entry(job_id.clone())
            .or_insert_with(|| TrackedJob::new(job_id, capacity))
    }

    /// Start tracking `job_id` (no-op if already tracked) and observe it.
    pub fn track(&mut self, job_id: &JobId) -> watch::Receiver<JobView> {
        self.entry(job_id).tx.subscribe()
    }

    pub fn subscribe(&self, job_id: &JobId) -> Option<watch::Receiver<JobView>> {
        self.jobs.get(job_id).map(|job| job.tx.subscribe())
    }

    pub fn view(&self, job_id: &JobId) -> Option<JobView> {
        self.jobs.get(job_id).map(|job| job.ledger.view().clone())
    }

    pub fn tracked(&self) -> impl Iterator<Item = &JobId> {
        self.jobs.keys()
    }

    /// Record a freshly started job.
    pub fn on_started(&mut self, handle: JobHandle) -> watch::Receiver<JobView> {
        let stamp = self.clock.tick();
        let job_id = handle.job_id.clone();
        info!(job_id = %job_id, status = %handle.status, "tracking new job");
        let job = self.entry(&job_id);
        job.push(Update::Control { stamp, completed_at: Utc::now(), body: ControlBody::Started(handle) });
        job.tx.subscribe()
    }

    /// Fold one stamped telemetry event. Returns whether the view changed.
    pub fn apply_telemetry(&mut self, event: TelemetryEvent) -> bool {
        let job_id = event.job_id.clone();
        debug!(job_id = %job_id, seq = %event.seq, kind = event.kind.name(), "telemetry event");
        self.entry(&job_id).push(Update::Telemetry(event))
    }

    pub fn begin_call(&mut self, job_id: &JobId) -> Ticket {
        self.entry(job_id).guard.issue()
    }

    pub fn abandon_call(&mut self, job_id: &JobId, ticket: Ticket) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.guard.abandon(ticket);
        }
    }

    /// Fold a control response if its call is still current.
    pub fn finish_call(&mut self, job_id: &JobId, ticket: Ticket, body: ControlBody) -> bool {
        let Some(job) = self.jobs.get_mut(job_id) else {
            warn!(job_id = %job_id, "response for untracked job dropped");
            return false;
        };
        if !job.guard.admit(ticket) {
            debug!(job_id = %job_id, ticket = ticket.0, "superseded control response dropped");
            return false;
        }
        let stamp = self.clock.tick();
        job.push(Update::Control { stamp, completed_at: Utc::now(), body })
    }

    pub fn forget(&mut self, job_id: &JobId) -> bool {
        self.jobs.remove(job_id).is_some()
    }

    /// Pause, resume or stop through `api` and fold the acknowledgement.
    pub async fn control(
        &mut self,
        api: &dyn JobControl,
        job_id: &JobId,
        action: ControlAction,
    ) -> SyncResult<JobView> {
        let ticket = self.begin_call(job_id);
        match tokio::time::timeout(self.call_timeout, api.control(job_id, action)).await {
            Ok(Ok(ack)) => {
                self.finish_call(job_id, ticket, ControlBody::Ack(ack));
            }
            Ok(Err(err)) => {
                self.abandon_call(job_id, ticket);
                return Err(err);
            }
            Err(_) => {
                self.abandon_call(job_id, ticket);
                warn!(job_id = %job_id, %action, "control call timed out");
                return Err(SyncError::Timeout(format!("{action} {job_id}")));
            }
        }
        self.view(job_id)
            .ok_or_else(|| SyncError::InvalidInput(format!("job {job_id} is not tracked")))
    }

    /// Poll the remote snapshot and fold it.
    pub async fn refresh(&mut self, api: &dyn JobControl, job_id: &JobId) -> SyncResult<JobView> {
        let ticket = self.begin_call(job_id);
        match tokio::time::timeout(self.call_timeout, api.status(job_id)).await {
            Ok(Ok(job)) => {
                self.finish_call(job_id, ticket, ControlBody::Snapshot(job));
            }
            Ok(Err(err)) => {
                self.abandon_call(job_id, ticket);
                return Err(err);
            }
            Err(_) => {
                self.abandon_call(job_id, ticket);
                return Err(SyncError::Timeout(format!("status {job_id}")));
            }
        }
        self.view(job_id)
            .ok_or_else(|| SyncError::InvalidInput(format!("job {job_id} is not tracked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::HealthReport;
    use crate::job::{ControlAck, Job, JobStatus, TrainingJobSpec};
    use crate::telemetry::EventKind;
    use async_trait::async_trait;

    fn id() -> JobId {
        JobId::new("job_7")
    }

    fn ack(status: JobStatus) -> ControlBody {
        ControlBody::Ack(ControlAck { job_id: id(), status, message: None })
    }

    fn started(tracker: &mut JobTracker) -> watch::Receiver<JobView> {
        tracker.on_started(JobHandle {
            job_id: id(),
            task_id: None,
            status: JobStatus::Running,
            message: Some("Training started".to_string()),
        })
    }

    fn tracker() -> JobTracker {
        JobTracker::new(SequenceClock::new(), Duration::from_millis(50))
    }

    #[test]
    fn test_guard_rejects_abandoned_and_superseded() {
        let mut guard = CallGuard::default();
        let first = guard.issue();
        let second = guard.issue();
        let third = guard.issue();
        guard.abandon(first);
        assert!(guard.admit(third));
        assert!(!guard.admit(first));
        assert!(!guard.admit(second));
    }

    #[test]
    fn test_late_pause_after_stop_is_ignored() {
        let mut tracker = tracker();
        let rx = started(&mut tracker);

        let pause = tracker.begin_call(&id());
        tracker.abandon_call(&id(), pause);
        let stop = tracker.begin_call(&id());
        assert!(tracker.finish_call(&id(), stop, ack(JobStatus::Stopped)));

        assert!(!tracker.finish_call(&id(), pause, ack(JobStatus::Paused)));
        assert_eq!(rx.borrow().status.value, JobStatus::Stopped);
    }

    #[test]
    fn test_older_response_cannot_overwrite_newer_call() {
        let mut tracker = tracker();
        started(&mut tracker);

        let pause = tracker.begin_call(&id());
        let resume = tracker.begin_call(&id());
        assert!(tracker.finish_call(&id(), resume, ack(JobStatus::Running)));
        assert!(!tracker.finish_call(&id(), pause, ack(JobStatus::Paused)));
        assert_eq!(tracker.view(&id()).unwrap().status.value, JobStatus::Running);
    }

    #[test]
    fn test_observers_share_one_view() {
        let mut tracker = tracker();
        let first = started(&mut tracker);
        let second = tracker.subscribe(&id()).unwrap();

        let seq = tracker.clock().tick();
        tracker.apply_telemetry(TelemetryEvent {
            job_id: id(),
            seq,
            received_at: Utc::now(),
            kind: EventKind::Status { status: JobStatus::Paused, progress: Some(30), message: None },
        });

        assert_eq!(*first.borrow(), *second.borrow());
        assert_eq!(first.borrow().progress.value, 30);
    }

    #[test]
    fn test_jobs_are_independent() {
        let mut tracker = tracker();
        started(&mut tracker);
        let other = JobId::new("job_8");
        let ticket = tracker.begin_call(&other);
        tracker.finish_call(&other, ticket, ControlBody::Ack(ControlAck {
            job_id: other.clone(),
            status: JobStatus::Stopped,
            message: None,
        }));
        assert_eq!(tracker.view(&id()).unwrap().status.value, JobStatus::Running);
        assert_eq!(tracker.view(&other).unwrap().status.value, JobStatus::Stopped);
    }

    struct SlowControl {
        delay: Duration,
    }

    #[async_trait]
    impl JobControl for SlowControl {
        async fn start(&self, _spec: &TrainingJobSpec) -> SyncResult<JobHandle> {
            unreachable!()
        }

        async fn status(&self, job_id: &JobId) -> SyncResult<Job> {
            let mut job = Job::new(job_id.clone(), JobStatus::Running);
            job.progress = Some(40);
            Ok(job)
        }

        async fn control(&self, job_id: &JobId, action: ControlAction) -> SyncResult<ControlAck> {
            tokio::time::sleep(self.delay).await;
            let status = match action {
                ControlAction::Pause => JobStatus::Paused,
                ControlAction::Resume => JobStatus::Running,
                ControlAction::Stop => JobStatus::Stopped,
            };
            Ok(ControlAck { job_id: job_id.clone(), status, message: None })
        }

        async fn health(&self) -> SyncResult<HealthReport> {
            Ok(HealthReport { status: "healthy".to_string(), timestamp: None, services: Default::default() })
        }
    }

    #[tokio::test]
    async fn test_timed_out_call_leaves_view_untouched() {
        let mut tracker = tracker();
        started(&mut tracker);
        let slow = SlowControl { delay: Duration::from_millis(500) };

        let err = tracker.control(&slow, &id(), ControlAction::Pause).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        assert_eq!(tracker.view(&id()).unwrap().status.value, JobStatus::Running);

        let fast = SlowControl { delay: Duration::ZERO };
        let view = tracker.control(&fast, &id(), ControlAction::Stop).await.unwrap();
        assert_eq!(view.status.value, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn test_refresh_folds_snapshot() {
        let mut tracker = tracker();
        started(&mut tracker);
        let api = SlowControl { delay: Duration::ZERO };
        let view = tracker.refresh(&api, &id()).await.unwrap();
        assert_eq!(view.progress.value, 40);
    }
}
