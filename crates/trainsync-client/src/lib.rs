//! Network side of TrainSync.
//!
//! [`JobControlClient`] and [`RegistryClient`] speak the service's REST API;
//! [`TelemetryHub`] keeps one websocket per watched job and feeds stamped
//! events into a single queue for a [`trainsync_core::JobTracker`].

mod http;

pub mod datasets;
pub mod jobs;
pub mod stream;

pub use datasets::RegistryClient;
pub use jobs::JobControlClient;
pub use stream::{StreamState, TelemetryHub};
