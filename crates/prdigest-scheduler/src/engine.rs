//! Tick loop — the periodic poller that discovers due monitoring
//! entries and drives the executor, one run at a time.
//!
//! A single worker task owns all execution: scheduled runs within a
//! tick go oldest-first, manual triggers interleave between runs, and
//! nothing ever executes the same entry concurrently. A tick that
//! overruns the period is followed immediately by the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use prdigest_core::types::{MonitoringEntry, RunRecord, TriggerType};
use prdigest_store::Store;

use crate::executor::RunExecutor;

/// A manually-triggered run handed to the worker by the hooks.
pub struct ManualRun {
    pub entry: MonitoringEntry,
    pub run: RunRecord,
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

pub struct TickLoop {
    store: Arc<Store>,
    executor: Arc<RunExecutor>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
    manual_rx: mpsc::Receiver<ManualRun>,
    manual_open: bool,
}

impl TickLoop {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<RunExecutor>,
        period: Duration,
        shutdown: watch::Receiver<bool>,
        manual_rx: mpsc::Receiver<ManualRun>,
    ) -> Self {
        Self {
            store,
            executor,
            period,
            shutdown,
            manual_rx,
            manual_open: true,
        }
    }

    /// Run until the shutdown signal flips. An in-progress run always
    /// completes; only the scheduling of new runs stops.
    pub async fn run(mut self) {
        tracing::info!("⏰ tick loop started (period {}s)", self.period.as_secs());
        let mut interval = tokio::time::interval(self.period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.shutdown_requested() {
                        break;
                    }
                    self.run_due_entries().await;
                }
                manual = self.manual_rx.recv(), if self.manual_open => {
                    match manual {
                        Some(manual) => {
                            if self.shutdown_requested() {
                                break;
                            }
                            if let Err(e) = self
                                .executor
                                .drive(&manual.entry, &manual.run, manual.window)
                                .await
                            {
                                tracing::error!(run = %manual.run.id, "manual run failed: {e}");
                            }
                        }
                        None => self.manual_open = false,
                    }
                }
                _ = self.shutdown.changed() => break,
            }
        }
        tracing::info!("tick loop stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_due_entries(&self) {
        let due = match self.store.list_due_monitoring_entries(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("due-entry query failed: {e}");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        tracing::info!("🔔 {} monitoring entries due", due.len());

        for entry in due {
            // Stop scheduling new runs once shutdown is requested.
            if self.shutdown_requested() {
                break;
            }
            if let Err(e) = self.executor.execute(&entry, TriggerType::Scheduled).await {
                tracing::error!(entry = %entry.id, "scheduled run failed to open: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use prdigest_core::error::Result;
    use prdigest_core::traits::{
        ActivitySource, DeliveryChannel, FetchRequest, SummaryProvider,
    };
    use prdigest_core::types::{
        ActivityBundle, Author, EntryStatus, FetchWindowPolicy, MonitorMode, PlanSnapshot,
        RepoStatus, Repository, RunStatus, ScheduleKind, ScheduleSpec, new_id,
    };
    use prdigest_store::db::blank_tenant;
    use crate::executor::ExecutorConfig;

    struct Quiet;

    #[async_trait]
    impl ActivitySource for Quiet {
        async fn fetch(&self, _: &FetchRequest) -> Result<ActivityBundle> {
            Ok(ActivityBundle::default())
        }
    }

    #[async_trait]
    impl SummaryProvider for Quiet {
        async fn summarize(&self, _: &ActivityBundle, _: &str) -> Result<String> {
            Ok("quiet".into())
        }
    }

    #[async_trait]
    impl DeliveryChannel for Quiet {
        async fn deliver(&self, _: &[String], _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn seed_due_entry(store: &Store) -> MonitoringEntry {
        let tenant = blank_tenant("acme", PlanSnapshot::default());
        store.upsert_tenant(&tenant).unwrap();
        let repo = Repository {
            id: new_id("repo"),
            tenant_id: tenant.id.clone(),
            owner: "acme".into(),
            name: "widgets".into(),
            status: RepoStatus::Active,
            credential: None,
            created_at: Utc::now(),
        };
        store.upsert_repository(&repo).unwrap();
        let author = Author {
            id: new_id("au"),
            host_user_id: "u-1".into(),
            username: "octocat".into(),
            display_name: None,
            created_at: Utc::now(),
        };
        store.upsert_author(&author).unwrap();
        let entry = MonitoringEntry {
            id: new_id("mon"),
            tenant_id: tenant.id,
            author_id: author.id,
            repository_id: repo.id,
            mode: MonitorMode::Ghost,
            status: EntryStatus::Active,
            schedule: ScheduleSpec::new(
                ScheduleKind::Daily,
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                "UTC",
            ),
            window_policy: FetchWindowPolicy::SinceLastRun,
            recipients: vec!["a@x.com".into()],
            note: None,
            last_run_at: None,
            next_run_at: Some(Utc::now() - chrono::Duration::minutes(1)),
            created_at: Utc::now(),
        };
        store.upsert_monitoring_entry(&entry).unwrap()
    }

    fn build_loop(
        store: Arc<Store>,
    ) -> (TickLoop, watch::Sender<bool>, mpsc::Sender<ManualRun>) {
        let quiet = Arc::new(Quiet);
        let executor = Arc::new(RunExecutor::new(
            store.clone(),
            None,
            quiet.clone(),
            quiet.clone(),
            quiet,
            ExecutorConfig::default(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (manual_tx, manual_rx) = mpsc::channel(4);
        let tick = TickLoop::new(
            store,
            executor,
            Duration::from_millis(20),
            shutdown_rx,
            manual_rx,
        );
        (tick, shutdown_tx, manual_tx)
    }

    #[tokio::test]
    async fn test_due_entry_runs_and_leaves_the_due_set() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let entry = seed_due_entry(&store);
        let (tick, shutdown_tx, _manual_tx) = build_loop(store.clone());

        let handle = tokio::spawn(tick.run());
        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let runs = store.list_runs_for_entry(&entry.id, 10).unwrap();
        assert!(!runs.is_empty(), "the due entry must have run");
        assert!(runs.iter().all(|r| r.status == RunStatus::Completed));

        let after = store.get_monitoring_entry(&entry.id).unwrap();
        assert!(after.next_run_at.unwrap() > Utc::now());
        assert!(
            store
                .list_due_monitoring_entries(Utc::now())
                .unwrap()
                .is_empty(),
            "entry must no longer be due"
        );
    }

    #[tokio::test]
    async fn test_manual_run_executes_in_worker() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut entry = seed_due_entry(&store);
        // Not due: only the manual trigger should run it.
        entry.next_run_at = Some(Utc::now() + chrono::Duration::hours(6));
        let entry = store.upsert_monitoring_entry(&entry).unwrap();

        let (tick, shutdown_tx, manual_tx) = build_loop(store.clone());
        let handle = tokio::spawn(tick.run());

        let run = store
            .create_run(&entry, TriggerType::Manual, None)
            .unwrap();
        manual_tx
            .send(ManualRun {
                entry: entry.clone(),
                run: run.clone(),
                window: None,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let stored = store.get_run(&run.id).unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.trigger, TriggerType::Manual);
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tick, shutdown_tx, _manual_tx) = build_loop(store.clone());
        let handle = tokio::spawn(tick.run());
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop must stop promptly")
            .unwrap();
    }
}
