use super::{CacheError, CacheRecord, CacheStore};
use crate::error::SyncResult;
use crate::registry::{DatasetRegistry, PreprocessingStep};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Written(CacheRecord),
    /// The cached record already reflects the latest execution.
    Unchanged,
    /// The registry has no successful step of this type.
    NothingToRestore,
}

/// Latest successful step of `step_type`: newest `created_at`, then highest id.
pub fn latest_successful<'a>(steps: &'a [PreprocessingStep], step_type: &str) -> Option<&'a PreprocessingStep> {
    steps
        .iter()
        .filter(|s| s.step_type == step_type && s.is_successful())
        .max_by_key(|s| (s.created_at(), s.id))
}

fn to_record(dataset_id: &str, step: &PreprocessingStep) -> CacheRecord {
    CacheRecord {
        dataset_id: dataset_id.to_string(),
        step_type: step.step_type.clone(),
        methods: step.methods(),
        columns: step.columns(),
        execution_time: step.execution_time(),
        executed: true,
        step_id: step.id,
        remote_created_at: step.created_at().unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Creates step cache records from the registry's preprocessing history.
///
/// This is the only component that writes records.
pub struct StepRestorer {
    store: Arc<dyn CacheStore>,
    registry: Arc<dyn DatasetRegistry>,
}

impl StepRestorer {
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<dyn DatasetRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn restore(&self, dataset_id: &str, step_type: &str) -> SyncResult<RestoreOutcome> {
        let steps = self.registry.preprocessing_steps(dataset_id).await?;
        self.restore_from(dataset_id, step_type, &steps)
    }

    /// Restore every step type present in the dataset's history.
    pub async fn restore_all(&self, dataset_id: &str) -> SyncResult<Vec<(String, RestoreOutcome)>> {
        let steps = self.registry.preprocessing_steps(dataset_id).await?;
        let step_types: BTreeSet<&str> = steps.iter().map(|s| s.step_type.as_str()).collect();
        let mut outcomes = Vec::with_capacity(step_types.len());
        for step_type in step_types {
            let outcome = self.restore_from(dataset_id, step_type, &steps)?;
            outcomes.push((step_type.to_string(), outcome));
        }
        Ok(outcomes)
    }

    fn restore_from(
        &self,
        dataset_id: &str,
        step_type: &str,
        steps: &[PreprocessingStep],
    ) -> SyncResult<RestoreOutcome> {
        let Some(step) = latest_successful(steps, step_type) else {
            debug!(dataset_id, step_type, "no successful step to restore");
            return Ok(RestoreOutcome::NothingToRestore);
        };
        let record = to_record(dataset_id, step);

        match self.store.get(&record.key()) {
            Ok(Some(existing)) if !record.supersedes(&existing) => return Ok(RestoreOutcome::Unchanged),
            Ok(_) => {}
            Err(CacheError::Corrupted { reason, .. }) => {
                warn!(dataset_id, step_type, %reason, "overwriting corrupted cache entry");
            }
            Err(e) => return Err(e.into()),
        }

        self.store.put(&record)?;
        info!(dataset_id, step_type, step_id = record.step_id, "restored step cache record");
        Ok(RestoreOutcome::Written(record))
    }
}
