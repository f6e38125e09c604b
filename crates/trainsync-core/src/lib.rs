//! TrainSync core
//!
//! Client-side state for remote training jobs:
//! - Validating job specs and classifying failures (`SyncError`)
//! - Merging control responses and telemetry into one view per job (`reconcile`, `tracker`)
//! - Keeping the local step cache consistent with the dataset registry (`cache`)
//! - Bounded page windows for previews (`paging`)
//!
//! Network access lives behind the `JobControl` and `DatasetRegistry` traits.

pub mod cache;
pub mod config;
pub mod control;
pub mod error;
pub mod job;
pub mod paging;
pub mod reconcile;
pub mod registry;
pub mod sequence;
pub mod telemetry;
pub mod tracker;

pub use cache::{CacheError, CacheKey, CacheReconciler, CacheRecord, CacheStore, FileCacheStore, MemoryCacheStore, ReconcileReport, RestoreOutcome, StepRestorer};
pub use config::{ConfigLayer, ReconnectPolicy, SyncConfig};
pub use control::{ControlAction, HealthReport, JobControl};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use job::{ControlAck, Job, JobHandle, JobId, JobStatus, Metrics, ModelFamily, TaskType, TrainRequest, TrainingJobSpec};
pub use paging::{Page, PageWindow};
pub use reconcile::{ControlBody, JobLedger, JobView, MetricsPoint, Stamped, Update, apply};
pub use registry::{DatasetRegistry, PreprocessingStep, PreviewRow};
pub use sequence::{SequenceClock, Stamp};
pub use telemetry::{EventKind, ResourceUsage, StreamSignal, TelemetryEvent};
pub use tracker::{CallGuard, JobTracker, Ticket};
