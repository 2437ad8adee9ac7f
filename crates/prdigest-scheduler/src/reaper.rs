//! Reaper — converts runs stranded in the `started` state into failed
//! runs and re-advances their entries.
//!
//! A crash between opening and closing a run would otherwise leave the
//! run open forever and, worse, the entry stuck at a stale
//! `next_run_at`. One pass runs at startup, then hourly.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::watch;

use prdigest_core::error::Result;
use prdigest_core::types::RunCompletion;
use prdigest_store::Store;

use crate::recurrence::next_firing;

const SWEEP_PERIOD: StdDuration = StdDuration::from_secs(3600);

/// One sweep: close every `started` run older than `grace` as
/// `failed / abandoned` and recompute its entry's next firing.
/// Returns how many runs were reaped.
pub fn reap_abandoned(store: &Store, grace: Duration) -> Result<usize> {
    let now = Utc::now();
    let stale = store.list_stale_started_runs(now - grace)?;
    let mut reaped = 0;

    for run in stale {
        if !store.complete_run(&run.id, &RunCompletion::failed("abandoned"))? {
            continue;
        }
        reaped += 1;
        tracing::warn!(run = %run.id, entry = %run.entry_id, started = %run.started_at, "reaped abandoned run");

        match store.get_monitoring_entry(&run.entry_id) {
            Ok(entry) => {
                let next = next_firing(&entry.schedule, now);
                store.advance_schedule(&entry.id, run.started_at, next)?;
            }
            Err(e) => {
                tracing::warn!(run = %run.id, "entry lookup failed while reaping: {e}");
            }
        }
    }
    Ok(reaped)
}

/// Hourly sweep task; stops when the shutdown signal flips.
pub async fn run_sweeper(store: Arc<Store>, grace: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(SWEEP_PERIOD);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                match reap_abandoned(&store, grace) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("reaper closed {n} abandoned runs"),
                    Err(e) => tracing::error!("reaper sweep failed: {e}"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use prdigest_core::types::{
        Author, DeliveryStatus, EntryStatus, FetchWindowPolicy, MonitorMode, MonitoringEntry,
        PlanSnapshot, RepoStatus, Repository, RunStatus, ScheduleKind, ScheduleSpec, TriggerType,
        new_id,
    };
    use prdigest_store::db::blank_tenant;

    fn seed(store: &Store) -> MonitoringEntry {
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
            next_run_at: Some(Utc::now() - chrono::Duration::minutes(10)),
            created_at: Utc::now(),
        };
        store.upsert_monitoring_entry(&entry).unwrap()
    }

    #[test]
    fn test_stale_run_reaped_and_schedule_recomputed() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        let run = store
            .create_run(&entry, TriggerType::Scheduled, entry.next_run_at)
            .unwrap();

        // Grace of -6 minutes makes the just-started run look stale,
        // mirroring a run opened six minutes before a 5-minute window.
        let reaped = reap_abandoned(&store, Duration::minutes(-6)).unwrap();
        assert_eq!(reaped, 1);

        let stored = store.get_run(&run.id).unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        let delivery = stored.delivery.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.failure_reason.as_deref(), Some("abandoned"));

        let after = store.get_monitoring_entry(&entry.id).unwrap();
        assert!(after.next_run_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_fresh_runs_survive_sweep() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        let run = store
            .create_run(&entry, TriggerType::Scheduled, None)
            .unwrap();

        let reaped = reap_abandoned(&store, Duration::minutes(5)).unwrap();
        assert_eq!(reaped, 0);
        assert_eq!(
            store.get_run(&run.id).unwrap().status,
            RunStatus::Started
        );
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        store
            .create_run(&entry, TriggerType::Scheduled, None)
            .unwrap();

        assert_eq!(reap_abandoned(&store, Duration::minutes(-6)).unwrap(), 1);
        assert_eq!(reap_abandoned(&store, Duration::minutes(-6)).unwrap(), 0);
    }
}
