//! Run pipeline hooks — the small surface the API layer drives the
//! engine through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use prdigest_core::error::{DigestError, Result};
use prdigest_core::types::{MonitoringEntry, RunCompletion, RunRecord, TriggerType};
use prdigest_store::Store;

use crate::engine::ManualRun;

pub struct PipelineHooks {
    store: Arc<Store>,
    manual_tx: mpsc::Sender<ManualRun>,
}

impl PipelineHooks {
    pub fn new(store: Arc<Store>, manual_tx: mpsc::Sender<ManualRun>) -> Self {
        Self { store, manual_tx }
    }

    /// Open a manual run for the entry and queue it on the executor's
    /// worker. Returns the run id immediately; callers poll the run
    /// record for the outcome.
    pub async fn trigger_now(
        &self,
        entry_id: &str,
        fetch_override: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<String> {
        let entry = self.store.get_monitoring_entry(entry_id)?;
        let run = self.store.create_run(&entry, TriggerType::Manual, None)?;
        let run_id = run.id.clone();
        self.manual_tx
            .send(ManualRun {
                entry,
                run,
                window: fetch_override,
            })
            .await
            .map_err(|_| DigestError::Store("run worker is not accepting triggers".into()))?;
        tracing::info!(run = %run_id, entry = %entry_id, "manual run queued");
        Ok(run_id)
    }

    /// The same due set the tick loop polls, for an external worker.
    pub fn list_due(&self) -> Result<Vec<MonitoringEntry>> {
        self.store.list_due_monitoring_entries(Utc::now())
    }

    /// Commit a run produced out-of-process. The run must still be
    /// open; terminal fields are written exactly once.
    pub fn complete_run(&self, run_id: &str, completion: &RunCompletion) -> Result<()> {
        if self.store.complete_run(run_id, completion)? {
            Ok(())
        } else {
            Err(DigestError::Store(format!("run {run_id} is not open")))
        }
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.store.get_run(run_id)
    }
}
