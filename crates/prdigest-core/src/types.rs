//! Core data model — tenants, repositories, authors, monitoring
//! entries, and run records.
//!
//! Records reference each other by opaque string id only; the store is
//! the single place that resolves references.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Generate an opaque id with a short type prefix. These strings are
/// primary keys, so uniqueness rests on the UUID, not the clock.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

// ─── Tenants & plans ──────────────────────────────────────

/// Subscription lifecycle state, driven by billing webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Trialing,
        }
    }
}

/// Plan limits copied onto the tenant at subscription time. This
/// snapshot, not the plan catalogue, is the source of truth for quota
/// checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub name: String,
    pub max_repos: u32,
    pub max_authors: u32,
    pub max_emails_per_month: u32,
}

impl Default for PlanSnapshot {
    fn default() -> Self {
        Self {
            name: "free".into(),
            max_repos: 1,
            max_authors: 1,
            max_emails_per_month: 50,
        }
    }
}

/// Current consumption against the plan snapshot. Counters are
/// non-negative; the email counter resets when the usage period rolls
/// over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub repos_count: u32,
    pub authors_count: u32,
    pub emails_sent_this_month: u32,
    pub usage_period_start: DateTime<Utc>,
}

/// One subscribed organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub subscription: SubscriptionStatus,
    pub plan: PlanSnapshot,
    pub usage: UsageSnapshot,
    pub created_at: DateTime<Utc>,
}

// ─── Repositories & authors ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Active,
    Revoked,
    TokenError,
    Paused,
    Removed,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Active => "active",
            RepoStatus::Revoked => "revoked",
            RepoStatus::TokenError => "token_error",
            RepoStatus::Paused => "paused",
            RepoStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "revoked" => RepoStatus::Revoked,
            "token_error" => RepoStatus::TokenError,
            "paused" => RepoStatus::Paused,
            "removed" => RepoStatus::Removed,
            _ => RepoStatus::Active,
        }
    }
}

/// A monitored repository on the version-control host. The access
/// credential is stored encrypted and is only decrypted inside the run
/// executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub tenant_id: String,
    pub owner: String,
    pub name: String,
    pub status: RepoStatus,
    /// AEAD-sealed access token, base64. None = rely on the
    /// process-global token or the credential-less search path.
    pub credential: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A code author in the global registry, addressable by the host-side
/// user id. Many tenants may reference the same author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub host_user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─── Schedules ──────────────────────────────────────

/// When a monitoring entry fires, relative to a wall-clock `time` in an
/// IANA `timezone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum ScheduleKind {
    Daily,
    SpecificWeekdays { weekdays: Vec<Weekday> },
    FixedInterval { interval_days: u32 },
    MonthlyDate { day_of_month: u32 },
    Yearly { month: u32, day: u32 },
    OneTime {
        #[serde(default)]
        date: Option<DateTime<Utc>>,
    },
}

/// A full schedule spec as persisted on a monitoring entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(flatten)]
    pub kind: ScheduleKind,
    pub time: NaiveTime,
    pub timezone: String,
    #[serde(default = "bool_true", rename = "isActive")]
    pub is_active: bool,
}

fn bool_true() -> bool {
    true
}

impl ScheduleSpec {
    pub fn new(kind: ScheduleKind, time: NaiveTime, timezone: &str) -> Self {
        Self {
            kind,
            time,
            timezone: timezone.to_string(),
            is_active: true,
        }
    }
}

// ─── Monitoring entries ──────────────────────────────────────

/// Whether the monitored author accepted an invite (open) or is
/// passively monitored (ghost).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    Ghost,
    Open,
}

impl MonitorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorMode::Ghost => "ghost",
            MonitorMode::Open => "open",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "open" => MonitorMode::Open,
            _ => MonitorMode::Ghost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Paused,
    Removed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Paused => "paused",
            EntryStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paused" => EntryStatus::Paused,
            "removed" => EntryStatus::Removed,
            _ => EntryStatus::Active,
        }
    }
}

/// How the fetch window for a run is determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FetchWindowPolicy {
    /// `[last_run_at ?? now − default window, now]`
    SinceLastRun,
    /// A fixed, admin-configured interval.
    ExplicitRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// The central coordination record: tenant T wants periodic summaries
/// for author A on repository R.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringEntry {
    pub id: String,
    pub tenant_id: String,
    pub author_id: String,
    pub repository_id: String,
    pub mode: MonitorMode,
    pub status: EntryStatus,
    pub schedule: ScheduleSpec,
    pub window_policy: FetchWindowPolicy,
    pub recipients: Vec<String>,
    /// Contributor-authored context, snapshotted into each run.
    pub note: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Upper bound on the free-text note.
pub const MAX_NOTE_CHARS: usize = 5000;

// ─── Runs ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => TriggerType::Manual,
            _ => TriggerType::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Started,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => DeliveryStatus::Sent,
            "failed" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Skipped,
        }
    }
}

/// Terminal state of the email send attempt inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipients: Vec<String>,
    pub failure_reason: Option<String>,
}

impl DeliveryRecord {
    pub fn sent(sent_at: DateTime<Utc>, recipients: Vec<String>) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            sent_at: Some(sent_at),
            recipients,
            failure_reason: None,
        }
    }

    pub fn failed(recipients: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            sent_at: None,
            recipients,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Skipped,
            sent_at: None,
            recipients: Vec::new(),
            failure_reason: Some(reason.into()),
        }
    }
}

/// One attempted execution of a monitoring entry. Immutable once the
/// run leaves the `started` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub entry_id: String,
    pub tenant_id: String,
    pub author_id: String,
    pub repository_id: String,
    pub trigger: TriggerType,
    pub status: RunStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub window_from: Option<DateTime<Utc>>,
    pub window_to: Option<DateTime<Utc>>,
    pub pr_count: u32,
    pub pr_numbers: Vec<u64>,
    pub has_activity: bool,
    pub summary: Option<String>,
    pub note_snapshot: Option<String>,
    pub delivery: Option<DeliveryRecord>,
}

/// Terminal fields written exactly once when a run closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub window_from: Option<DateTime<Utc>>,
    pub window_to: Option<DateTime<Utc>>,
    pub pr_count: u32,
    pub pr_numbers: Vec<u64>,
    pub has_activity: bool,
    pub summary: Option<String>,
    pub note_snapshot: Option<String>,
    pub delivery: DeliveryRecord,
}

impl RunCompletion {
    /// A run that died before producing anything useful.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            window_from: None,
            window_to: None,
            pr_count: 0,
            pr_numbers: Vec::new(),
            has_activity: false,
            summary: None,
            note_snapshot: None,
            delivery: DeliveryRecord::failed(Vec::new(), reason),
        }
    }
}

// ─── Fetched activity ──────────────────────────────────────

/// One changed file inside a pull request, with a bounded patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<String>,
}

/// A pull request as seen by the fetch stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub author_login: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub html_url: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub repository: String,
    pub files: Vec<ChangedFile>,
}

/// Everything the fetch stage hands downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityBundle {
    pub prs: Vec<PullRequest>,
    pub has_activity: bool,
}
