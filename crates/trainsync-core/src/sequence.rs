use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Local receipt order. The only ordering the reconciler trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp(pub u64);

impl Stamp {
    pub const ZERO: Self = Self(0);
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic stamp source shared by the telemetry hub and the job tracker,
/// so stream events and control responses sit on one timeline.
#[derive(Debug, Clone, Default)]
pub struct SequenceClock {
    counter: Arc<AtomicU64>,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> Stamp {
        Stamp(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn last(&self) -> Stamp {
        Stamp(self.counter.load(Ordering::Relaxed))
    }
}
