//! Run executor — drives fetch → summarise → deliver for one
//! monitoring entry and records the outcome.
//!
//! The one rule that outranks all others: the schedule is advanced
//! after every run, including failed ones. An entry that stalls at a
//! stale `next_run_at` would never fire again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use prdigest_core::error::{DigestError, Result};
use prdigest_core::traits::{ActivitySource, DeliveryChannel, FetchRequest, SummaryProvider};
use prdigest_core::types::{
    ActivityBundle, DeliveryRecord, FetchWindowPolicy, MonitoringEntry, RepoStatus, Repository,
    RunCompletion, RunRecord, RunStatus, TriggerType,
};
use prdigest_store::{CredentialCipher, QuotaGate, Store, UsageKind};

use crate::recurrence::next_firing;

/// Instruction handed to the summarise stage with every bundle.
pub const SUMMARY_INSTRUCTION: &str = "Write a concise status update for the team describing what \
this author shipped and what is still in flight, based on the pull requests below. Plain text \
only; no subject line, greeting, or signature.";

/// Knobs the executor reads once at construction.
pub struct ExecutorConfig {
    /// Window used when an entry has never completed a run.
    pub default_fetch_window: Duration,
    /// Process-global host token, used when a repository carries no
    /// credential of its own.
    pub host_token: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_fetch_window: Duration::hours(24),
            host_token: None,
        }
    }
}

pub struct RunExecutor {
    store: Arc<Store>,
    quota: QuotaGate,
    cipher: Option<CredentialCipher>,
    source: Arc<dyn ActivitySource>,
    summarizer: Arc<dyn SummaryProvider>,
    channel: Arc<dyn DeliveryChannel>,
    config: ExecutorConfig,
}

impl RunExecutor {
    pub fn new(
        store: Arc<Store>,
        cipher: Option<CredentialCipher>,
        source: Arc<dyn ActivitySource>,
        summarizer: Arc<dyn SummaryProvider>,
        channel: Arc<dyn DeliveryChannel>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            quota: QuotaGate::new(store.clone()),
            store,
            cipher,
            source,
            summarizer,
            channel,
            config,
        }
    }

    /// Open and execute a run for `entry`. Returns the run id.
    pub async fn execute(&self, entry: &MonitoringEntry, trigger: TriggerType) -> Result<String> {
        let run = self.store.create_run(entry, trigger, entry.next_run_at)?;
        self.drive(entry, &run, None).await
    }

    /// Execute an already-opened run, optionally with an explicit
    /// fetch window (manual triggers).
    pub async fn drive(
        &self,
        entry: &MonitoringEntry,
        run: &RunRecord,
        fetch_override: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<String> {
        let now = Utc::now();
        tracing::info!(run = %run.id, entry = %entry.id, trigger = run.trigger.as_str(), "run started");

        let completion = match self.run_pipeline(entry, now, fetch_override).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(run = %run.id, entry = %entry.id, "run pipeline failed: {e}");
                RunCompletion::failed(e.to_string())
            }
        };

        match self.store.complete_run(&run.id, &completion) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(run = %run.id, "run was already closed, completion dropped")
            }
            Err(e) => tracing::error!(run = %run.id, "failed to close run: {e}"),
        }

        // Advance no matter what happened above.
        let next = next_firing(&entry.schedule, now);
        if let Err(e) = self.store.advance_schedule(&entry.id, now, next) {
            tracing::error!(entry = %entry.id, "failed to advance schedule: {e}");
        }

        tracing::info!(
            run = %run.id,
            status = completion.status.as_str(),
            delivery = completion.delivery.status.as_str(),
            next_run = next.map(|n| n.to_rfc3339()).unwrap_or_else(|| "none".into()),
            "run closed"
        );
        Ok(run.id.clone())
    }

    async fn run_pipeline(
        &self,
        entry: &MonitoringEntry,
        now: DateTime<Utc>,
        fetch_override: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<RunCompletion> {
        let repo = self.store.get_repository(&entry.repository_id)?;
        let author = self.store.get_author(&entry.author_id)?;

        let (from, to) = fetch_override.unwrap_or_else(|| match &entry.window_policy {
            FetchWindowPolicy::SinceLastRun => (
                entry
                    .last_run_at
                    .unwrap_or(now - self.config.default_fetch_window),
                now,
            ),
            FetchWindowPolicy::ExplicitRange { from, to } => (*from, *to),
        });

        let request = FetchRequest {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            author_login: author.username.clone(),
            credential: self.resolve_credential(&repo)?,
            from,
            to,
        };

        let bundle = match self.source.fetch(&request).await {
            Ok(bundle) => bundle,
            Err(DigestError::HostAuth(reason)) => {
                // The token no longer opens this repository. Flag it
                // for the owner and close the run without delivery.
                self.store
                    .update_repository_status(&repo.id, RepoStatus::TokenError)?;
                let mut completion = base_completion(entry, from, to, &ActivityBundle::default());
                completion.delivery = DeliveryRecord::skipped(reason);
                return Ok(completion);
            }
            Err(e) => return Err(e),
        };

        let mut completion = base_completion(entry, from, to, &bundle);

        if !bundle.has_activity {
            completion.delivery = DeliveryRecord::skipped("No activity");
            return Ok(completion);
        }

        completion.summary = match self
            .summarizer
            .summarize(&bundle, SUMMARY_INSTRUCTION)
            .await
        {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(entry = %entry.id, "summary generation failed: {e}");
                None
            }
        };

        let Some(summary) = completion.summary.clone() else {
            completion.delivery = DeliveryRecord::skipped("AI summary generation failed");
            return Ok(completion);
        };

        if entry.recipients.is_empty() {
            completion.delivery = DeliveryRecord::skipped("No recipients configured");
            return Ok(completion);
        }

        if !self.quota.can_consume(&entry.tenant_id, UsageKind::Email)? {
            completion.delivery = DeliveryRecord::skipped("monthly email limit reached");
            return Ok(completion);
        }

        let subject = format!(
            "Status update: {} on {}",
            author.username,
            repo.full_name()
        );
        completion.delivery = match self
            .channel
            .deliver(&entry.recipients, &subject, &summary)
            .await
        {
            Ok(()) => {
                // Count the unit actually spent. A concurrent send
                // that raced past the admission check stays visible in
                // the counter rather than being lost.
                if let Err(e) = self.quota.record(&entry.tenant_id, UsageKind::Email) {
                    tracing::error!(tenant = %entry.tenant_id, "email counter update failed: {e}");
                }
                DeliveryRecord::sent(Utc::now(), entry.recipients.clone())
            }
            Err(e) => DeliveryRecord::failed(entry.recipients.clone(), delivery_reason(e)),
        };
        Ok(completion)
    }

    fn resolve_credential(&self, repo: &Repository) -> Result<Option<String>> {
        if let Some(sealed) = &repo.credential {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                DigestError::Security(
                    "repository has a sealed credential but no credential key is configured".into(),
                )
            })?;
            return Ok(Some(cipher.unseal(sealed)?));
        }
        Ok(self.config.host_token.clone())
    }
}

fn base_completion(
    entry: &MonitoringEntry,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    bundle: &ActivityBundle,
) -> RunCompletion {
    RunCompletion {
        status: RunStatus::Completed,
        window_from: Some(from),
        window_to: Some(to),
        pr_count: bundle.prs.len() as u32,
        pr_numbers: bundle.prs.iter().map(|p| p.number).collect(),
        has_activity: bundle.has_activity,
        summary: None,
        note_snapshot: entry.note.clone(),
        delivery: DeliveryRecord::skipped("No activity"),
    }
}

/// The delivery record carries the transport message, not the error
/// envelope around it.
fn delivery_reason(e: DigestError) -> String {
    match e {
        DigestError::Delivery(msg) => msg,
        other => other.to_string(),
    }
}
