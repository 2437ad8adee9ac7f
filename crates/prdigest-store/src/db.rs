//! Store gateway — indexed reads/writes over the persistent records.
//!
//! All nested shapes (schedules, recipient lists, PR number lists) are
//! JSON columns; everything the scheduler filters on is a plain column
//! with an index. Timestamps are stored as fixed-width UTC RFC 3339 so
//! string comparison in SQL matches chronological order.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use prdigest_core::error::{DigestError, Result};
use prdigest_core::types::{
    Author, DeliveryRecord, DeliveryStatus, EntryStatus, FetchWindowPolicy, MonitorMode,
    MonitoringEntry, PlanSnapshot, RepoStatus, Repository, RunCompletion, RunRecord, RunStatus,
    ScheduleSpec, SubscriptionStatus, Tenant, TriggerType, UsageSnapshot, MAX_NOTE_CHARS, new_id,
};

/// Usage counters the quota gate can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Repo,
    Author,
    Email,
}

impl UsageKind {
    fn column(&self) -> &'static str {
        match self {
            UsageKind::Repo => "repos_count",
            UsageKind::Author => "authors_count",
            UsageKind::Email => "emails_sent_this_month",
        }
    }
}

/// The store gateway. Cheap to share behind an Arc; the inner
/// connection is guarded by a mutex that is never held across an await.
pub struct Store {
    conn: Mutex<Connection>,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_ts)
}

const TENANT_SELECT: &str = "SELECT id, name, owner_id, subscription, plan_name, max_repos, max_authors, max_emails_per_month, repos_count, authors_count, emails_sent_this_month, usage_period_start, created_at FROM tenants";

fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        subscription: SubscriptionStatus::parse(&row.get::<_, String>(3)?),
        plan: PlanSnapshot {
            name: row.get(4)?,
            max_repos: row.get(5)?,
            max_authors: row.get(6)?,
            max_emails_per_month: row.get(7)?,
        },
        usage: UsageSnapshot {
            repos_count: row.get(8)?,
            authors_count: row.get(9)?,
            emails_sent_this_month: row.get(10)?,
            usage_period_start: parse_ts(&row.get::<_, String>(11)?),
        },
        created_at: parse_ts(&row.get::<_, String>(12)?),
    })
}

const REPO_SELECT: &str =
    "SELECT id, tenant_id, owner, name, status, credential, created_at FROM repositories";

fn row_to_repository(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        status: RepoStatus::parse(&row.get::<_, String>(4)?),
        credential: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

const ENTRY_SELECT: &str = "SELECT id, tenant_id, author_id, repository_id, mode, status, schedule, window_policy, recipients, note, last_run_at, next_run_at, created_at FROM monitoring_entries";

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<MonitoringEntry> {
    let schedule_json: String = row.get(6)?;
    let policy_json: String = row.get(7)?;
    let recipients_json: String = row.get(8)?;
    Ok(MonitoringEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        author_id: row.get(2)?,
        repository_id: row.get(3)?,
        mode: MonitorMode::parse(&row.get::<_, String>(4)?),
        status: EntryStatus::parse(&row.get::<_, String>(5)?),
        schedule: serde_json::from_str(&schedule_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        window_policy: serde_json::from_str(&policy_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
        recipients: serde_json::from_str(&recipients_json).unwrap_or_default(),
        note: row.get(9)?,
        last_run_at: opt_ts(row.get(10)?),
        next_run_at: opt_ts(row.get(11)?),
        created_at: parse_ts(&row.get::<_, String>(12)?),
    })
}

const RUN_SELECT: &str = "SELECT id, entry_id, tenant_id, author_id, repository_id, trigger_type, status, scheduled_for, started_at, completed_at, window_from, window_to, pr_count, pr_numbers, has_activity, summary, note_snapshot, delivery_status, delivery_sent_at, delivery_recipients, delivery_failure_reason FROM runs";

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<RunRecord> {
    let delivery_status: Option<String> = row.get(17)?;
    let delivery = delivery_status.map(|status| DeliveryRecord {
        status: DeliveryStatus::parse(&status),
        sent_at: opt_ts(row.get(18).unwrap_or(None)),
        recipients: row
            .get::<_, String>(19)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        failure_reason: row.get(20).unwrap_or(None),
    });
    Ok(RunRecord {
        id: row.get(0)?,
        entry_id: row.get(1)?,
        tenant_id: row.get(2)?,
        author_id: row.get(3)?,
        repository_id: row.get(4)?,
        trigger: TriggerType::parse(&row.get::<_, String>(5)?),
        status: RunStatus::parse(&row.get::<_, String>(6)?),
        scheduled_for: opt_ts(row.get(7)?),
        started_at: parse_ts(&row.get::<_, String>(8)?),
        completed_at: opt_ts(row.get(9)?),
        window_from: opt_ts(row.get(10)?),
        window_to: opt_ts(row.get(11)?),
        pr_count: row.get(12)?,
        pr_numbers: row
            .get::<_, String>(13)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        has_activity: row.get::<_, i64>(14)? != 0,
        summary: row.get(15)?,
        note_snapshot: row.get(16)?,
        delivery,
    })
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT NOT NULL DEFAULT '',
                subscription TEXT NOT NULL DEFAULT 'trialing',
                plan_name TEXT NOT NULL DEFAULT 'free',
                max_repos INTEGER NOT NULL DEFAULT 1,
                max_authors INTEGER NOT NULL DEFAULT 1,
                max_emails_per_month INTEGER NOT NULL DEFAULT 50,
                repos_count INTEGER NOT NULL DEFAULT 0,
                authors_count INTEGER NOT NULL DEFAULT 0,
                emails_sent_this_month INTEGER NOT NULL DEFAULT 0,
                usage_period_start TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                full_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                credential TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, full_name)
            );

            CREATE TABLE IF NOT EXISTS authors (
                id TEXT PRIMARY KEY,
                host_user_id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                display_name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monitoring_entries (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                repository_id TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'ghost',
                status TEXT NOT NULL DEFAULT 'active',
                schedule TEXT NOT NULL,
                schedule_active INTEGER NOT NULL DEFAULT 1,
                window_policy TEXT NOT NULL,
                recipients TEXT NOT NULL DEFAULT '[]',
                note TEXT,
                last_run_at TEXT,
                next_run_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, author_id, repository_id)
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                entry_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                repository_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL DEFAULT 'scheduled',
                status TEXT NOT NULL DEFAULT 'started',
                scheduled_for TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                window_from TEXT,
                window_to TEXT,
                pr_count INTEGER NOT NULL DEFAULT 0,
                pr_numbers TEXT NOT NULL DEFAULT '[]',
                has_activity INTEGER NOT NULL DEFAULT 0,
                summary TEXT,
                note_snapshot TEXT,
                delivery_status TEXT,
                delivery_sent_at TEXT,
                delivery_recipients TEXT NOT NULL DEFAULT '[]',
                delivery_failure_reason TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_entries_due
                ON monitoring_entries(status, schedule_active, next_run_at);
            CREATE INDEX IF NOT EXISTS idx_entries_repo
                ON monitoring_entries(repository_id);
            CREATE INDEX IF NOT EXISTS idx_runs_entry
                ON runs(entry_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_runs_open
                ON runs(status, started_at);
            ",
        )?;
        Ok(())
    }

    // ─── Tenants ──────────────────────────────────────

    pub fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.lock().execute(
            "INSERT INTO tenants
             (id, name, owner_id, subscription, plan_name, max_repos, max_authors,
              max_emails_per_month, repos_count, authors_count, emails_sent_this_month,
              usage_period_start, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                subscription = excluded.subscription,
                plan_name = excluded.plan_name,
                max_repos = excluded.max_repos,
                max_authors = excluded.max_authors,
                max_emails_per_month = excluded.max_emails_per_month",
            params![
                tenant.id,
                tenant.name,
                tenant.owner_id,
                tenant.subscription.as_str(),
                tenant.plan.name,
                tenant.plan.max_repos,
                tenant.plan.max_authors,
                tenant.plan.max_emails_per_month,
                tenant.usage.repos_count,
                tenant.usage.authors_count,
                tenant.usage.emails_sent_this_month,
                ts(tenant.usage.usage_period_start),
                ts(tenant.created_at),
            ],
        )?;
        Ok(())
    }

    /// Tenant record together with its plan snapshot and usage counters.
    pub fn get_tenant_with_limits(&self, tenant_id: &str) -> Result<Tenant> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{TENANT_SELECT} WHERE id = ?1"))?;
        stmt.query_row([tenant_id], row_to_tenant)
            .map_err(|_| DigestError::Store(format!("tenant not found: {tenant_id}")))
    }

    /// Billing webhook write path: replace the plan snapshot without
    /// touching usage or schedule state.
    pub fn apply_plan_update(
        &self,
        tenant_id: &str,
        subscription: SubscriptionStatus,
        plan: &PlanSnapshot,
    ) -> Result<()> {
        let changed = self.lock().execute(
            "UPDATE tenants SET subscription = ?1, plan_name = ?2, max_repos = ?3,
             max_authors = ?4, max_emails_per_month = ?5 WHERE id = ?6",
            params![
                subscription.as_str(),
                plan.name,
                plan.max_repos,
                plan.max_authors,
                plan.max_emails_per_month,
                tenant_id
            ],
        )?;
        if changed == 0 {
            return Err(DigestError::Store(format!("tenant not found: {tenant_id}")));
        }
        Ok(())
    }

    /// Atomic counter update, floored at zero. Returns the new value.
    pub fn increment_usage(&self, tenant_id: &str, kind: UsageKind, delta: i64) -> Result<u32> {
        let col = kind.column();
        let conn = self.lock();
        let changed = conn.execute(
            &format!("UPDATE tenants SET {col} = MAX(0, {col} + ?1) WHERE id = ?2"),
            params![delta, tenant_id],
        )?;
        if changed == 0 {
            return Err(DigestError::Store(format!("tenant not found: {tenant_id}")));
        }
        let value: u32 = conn.query_row(
            &format!("SELECT {col} FROM tenants WHERE id = ?1"),
            [tenant_id],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    /// Reset the email counter and move the usage period forward.
    pub fn reset_usage_period(&self, tenant_id: &str, new_start: DateTime<Utc>) -> Result<()> {
        self.lock().execute(
            "UPDATE tenants SET emails_sent_this_month = 0, usage_period_start = ?1 WHERE id = ?2",
            params![ts(new_start), tenant_id],
        )?;
        Ok(())
    }

    // ─── Repositories ──────────────────────────────────────

    pub fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        self.lock().execute(
            "INSERT INTO repositories (id, tenant_id, owner, name, full_name, status, credential, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_id, full_name) DO UPDATE SET
                status = excluded.status,
                credential = excluded.credential",
            params![
                repo.id,
                repo.tenant_id,
                repo.owner,
                repo.name,
                repo.full_name(),
                repo.status.as_str(),
                repo.credential,
                ts(repo.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_repository(&self, repo_id: &str) -> Result<Repository> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{REPO_SELECT} WHERE id = ?1"))?;
        stmt.query_row([repo_id], row_to_repository)
            .map_err(|_| DigestError::Store(format!("repository not found: {repo_id}")))
    }

    pub fn update_repository_status(&self, repo_id: &str, status: RepoStatus) -> Result<()> {
        self.lock().execute(
            "UPDATE repositories SET status = ?1 WHERE id = ?2",
            params![status.as_str(), repo_id],
        )?;
        Ok(())
    }

    /// Soft-remove a repository and pause its dependent monitoring
    /// entries. Returns how many entries were paused.
    pub fn remove_repository(&self, repo_id: &str) -> Result<usize> {
        let conn = self.lock();
        conn.execute(
            "UPDATE repositories SET status = 'removed' WHERE id = ?1",
            [repo_id],
        )?;
        let paused = conn.execute(
            "UPDATE monitoring_entries SET status = 'paused' WHERE repository_id = ?1 AND status = 'active'",
            [repo_id],
        )?;
        Ok(paused)
    }

    // ─── Authors ──────────────────────────────────────

    pub fn upsert_author(&self, author: &Author) -> Result<()> {
        self.lock().execute(
            "INSERT INTO authors (id, host_user_id, username, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(host_user_id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name",
            params![
                author.id,
                author.host_user_id,
                author.username,
                author.display_name,
                ts(author.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_author(&self, author_id: &str) -> Result<Author> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, host_user_id, username, display_name, created_at FROM authors WHERE id = ?1",
        )?;
        stmt.query_row([author_id], |row| {
            Ok(Author {
                id: row.get(0)?,
                host_user_id: row.get(1)?,
                username: row.get(2)?,
                display_name: row.get(3)?,
                created_at: parse_ts(&row.get::<_, String>(4)?),
            })
        })
        .map_err(|_| DigestError::Store(format!("author not found: {author_id}")))
    }

    // ─── Monitoring entries ──────────────────────────────────────

    /// Insert a monitoring entry, or reactivate the existing row for
    /// the same (tenant, author, repository) triple in place. Returns
    /// the effective entry.
    pub fn upsert_monitoring_entry(&self, entry: &MonitoringEntry) -> Result<MonitoringEntry> {
        if let Some(note) = &entry.note {
            if note.chars().count() > MAX_NOTE_CHARS {
                return Err(DigestError::Store(format!(
                    "note exceeds {MAX_NOTE_CHARS} characters"
                )));
            }
        }
        let schedule = serde_json::to_string(&entry.schedule)?;
        let policy = serde_json::to_string(&entry.window_policy)?;
        let recipients = serde_json::to_string(&entry.recipients)?;
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO monitoring_entries
                 (id, tenant_id, author_id, repository_id, mode, status, schedule,
                  schedule_active, window_policy, recipients, note, last_run_at, next_run_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(tenant_id, author_id, repository_id) DO UPDATE SET
                    mode = excluded.mode,
                    status = excluded.status,
                    schedule = excluded.schedule,
                    schedule_active = excluded.schedule_active,
                    window_policy = excluded.window_policy,
                    recipients = excluded.recipients,
                    note = excluded.note,
                    next_run_at = excluded.next_run_at",
                params![
                    entry.id,
                    entry.tenant_id,
                    entry.author_id,
                    entry.repository_id,
                    entry.mode.as_str(),
                    entry.status.as_str(),
                    schedule,
                    entry.schedule.is_active as i64,
                    policy,
                    recipients,
                    entry.note,
                    entry.last_run_at.map(ts),
                    entry.next_run_at.map(ts),
                    ts(entry.created_at),
                ],
            )?;
        }
        self.get_entry_by_triple(&entry.tenant_id, &entry.author_id, &entry.repository_id)
    }

    fn get_entry_by_triple(
        &self,
        tenant_id: &str,
        author_id: &str,
        repository_id: &str,
    ) -> Result<MonitoringEntry> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{ENTRY_SELECT} WHERE tenant_id = ?1 AND author_id = ?2 AND repository_id = ?3"
        ))?;
        stmt.query_row([tenant_id, author_id, repository_id], row_to_entry)
            .map_err(|e| DigestError::Store(format!("monitoring entry lookup failed: {e}")))
    }

    pub fn get_monitoring_entry(&self, entry_id: &str) -> Result<MonitoringEntry> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{ENTRY_SELECT} WHERE id = ?1"))?;
        stmt.query_row([entry_id], row_to_entry)
            .map_err(|_| DigestError::Store(format!("monitoring entry not found: {entry_id}")))
    }

    /// Entries the tick loop should run now: active, schedule enabled,
    /// `next_run_at` in the past, oldest first.
    pub fn list_due_monitoring_entries(&self, now: DateTime<Utc>) -> Result<Vec<MonitoringEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{ENTRY_SELECT} WHERE status = 'active' AND schedule_active = 1
             AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC"
        ))?;
        let rows = stmt.query_map([ts(now)], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_entry_status(&self, entry_id: &str, status: EntryStatus) -> Result<()> {
        self.lock().execute(
            "UPDATE monitoring_entries SET status = ?1 WHERE id = ?2",
            params![status.as_str(), entry_id],
        )?;
        Ok(())
    }

    /// Identity webhook write path: the invited author accepted, the
    /// entry becomes editable by them.
    pub fn set_invite_accepted(&self, entry_id: &str) -> Result<()> {
        self.lock().execute(
            "UPDATE monitoring_entries SET mode = 'open' WHERE id = ?1",
            [entry_id],
        )?;
        Ok(())
    }

    /// Write `last_run_at` and `next_run_at` in a single statement.
    /// This is the last write of every run.
    pub fn advance_schedule(
        &self,
        entry_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.lock().execute(
            "UPDATE monitoring_entries SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
            params![ts(last_run_at), next_run_at.map(ts), entry_id],
        )?;
        Ok(())
    }

    // ─── Runs ──────────────────────────────────────

    /// Open a fresh run in the `started` state.
    pub fn create_run(
        &self,
        entry: &MonitoringEntry,
        trigger: TriggerType,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<RunRecord> {
        let run = RunRecord {
            id: new_id("run"),
            entry_id: entry.id.clone(),
            tenant_id: entry.tenant_id.clone(),
            author_id: entry.author_id.clone(),
            repository_id: entry.repository_id.clone(),
            trigger,
            status: RunStatus::Started,
            scheduled_for,
            started_at: Utc::now(),
            completed_at: None,
            window_from: None,
            window_to: None,
            pr_count: 0,
            pr_numbers: Vec::new(),
            has_activity: false,
            summary: None,
            note_snapshot: None,
            delivery: None,
        };
        self.lock().execute(
            "INSERT INTO runs (id, entry_id, tenant_id, author_id, repository_id,
             trigger_type, status, scheduled_for, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'started', ?7, ?8)",
            params![
                run.id,
                run.entry_id,
                run.tenant_id,
                run.author_id,
                run.repository_id,
                run.trigger.as_str(),
                run.scheduled_for.map(ts),
                ts(run.started_at),
            ],
        )?;
        Ok(run)
    }

    /// Write the terminal fields of a run exactly once. Returns false
    /// when the run was already closed (the write is dropped).
    pub fn complete_run(&self, run_id: &str, completion: &RunCompletion) -> Result<bool> {
        let pr_numbers = serde_json::to_string(&completion.pr_numbers)?;
        let recipients = serde_json::to_string(&completion.delivery.recipients)?;
        let changed = self.lock().execute(
            "UPDATE runs SET
                status = ?1, completed_at = ?2, window_from = ?3, window_to = ?4,
                pr_count = ?5, pr_numbers = ?6, has_activity = ?7, summary = ?8,
                note_snapshot = ?9, delivery_status = ?10, delivery_sent_at = ?11,
                delivery_recipients = ?12, delivery_failure_reason = ?13
             WHERE id = ?14 AND status = 'started'",
            params![
                completion.status.as_str(),
                ts(Utc::now()),
                completion.window_from.map(ts),
                completion.window_to.map(ts),
                completion.pr_count,
                pr_numbers,
                completion.has_activity as i64,
                completion.summary,
                completion.note_snapshot,
                completion.delivery.status.as_str(),
                completion.delivery.sent_at.map(ts),
                recipients,
                completion.delivery.failure_reason,
                run_id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{RUN_SELECT} WHERE id = ?1"))?;
        stmt.query_row([run_id], row_to_run)
            .map_err(|_| DigestError::Store(format!("run not found: {run_id}")))
    }

    /// Recent run history for one entry, newest first.
    pub fn list_runs_for_entry(&self, entry_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT} WHERE entry_id = ?1 ORDER BY started_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![entry_id, limit as i64], row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Runs still `started` whose start predates `cutoff` — crash
    /// leftovers for the reaper.
    pub fn list_stale_started_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<RunRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT} WHERE status = 'started' AND started_at <= ?1 ORDER BY started_at ASC"
        ))?;
        let rows = stmt.query_map([ts(cutoff)], row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// Convenience constructors used by tests and the onboarding surface.
pub fn blank_tenant(name: &str, plan: PlanSnapshot) -> Tenant {
    let now = Utc::now();
    Tenant {
        id: new_id("tn"),
        name: name.to_string(),
        owner_id: String::new(),
        subscription: SubscriptionStatus::Trialing,
        plan,
        usage: UsageSnapshot {
            repos_count: 0,
            authors_count: 0,
            emails_sent_this_month: 0,
            usage_period_start: now,
        },
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};
    use prdigest_core::types::ScheduleKind;

    fn sample_schedule() -> ScheduleSpec {
        ScheduleSpec::new(
            ScheduleKind::Daily,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            "Asia/Kolkata",
        )
    }

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
            host_user_id: "u-99".into(),
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
            schedule: sample_schedule(),
            window_policy: FetchWindowPolicy::SinceLastRun,
            recipients: vec!["a@x.com".into()],
            note: None,
            last_run_at: None,
            next_run_at: Some(Utc::now() - Duration::minutes(1)),
            created_at: Utc::now(),
        };
        store.upsert_monitoring_entry(&entry).unwrap()
    }

    #[test]
    fn test_due_listing_orders_by_next_run() {
        let store = Store::open_in_memory().unwrap();
        let first = seed(&store);
        let mut second = first.clone();
        second.id = new_id("mon");
        second.author_id = {
            let a = Author {
                id: new_id("au"),
                host_user_id: "u-100".into(),
                username: "hubber".into(),
                display_name: None,
                created_at: Utc::now(),
            };
            store.upsert_author(&a).unwrap();
            a.id
        };
        second.next_run_at = Some(Utc::now() - Duration::minutes(10));
        store.upsert_monitoring_entry(&second).unwrap();

        let due = store.list_due_monitoring_entries(Utc::now()).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, second.id, "older next_run_at comes first");
    }

    #[test]
    fn test_paused_entries_are_invisible() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        store
            .set_entry_status(&entry.id, EntryStatus::Paused)
            .unwrap();
        assert!(store
            .list_due_monitoring_entries(Utc::now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_inactive_schedule_is_invisible() {
        let store = Store::open_in_memory().unwrap();
        let mut entry = seed(&store);
        entry.schedule.is_active = false;
        store.upsert_monitoring_entry(&entry).unwrap();
        assert!(store
            .list_due_monitoring_entries(Utc::now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_upsert_reactivates_removed_entry_in_place() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        store
            .set_entry_status(&entry.id, EntryStatus::Removed)
            .unwrap();

        let mut readd = entry.clone();
        readd.id = new_id("mon");
        readd.status = EntryStatus::Active;
        let effective = store.upsert_monitoring_entry(&readd).unwrap();

        assert_eq!(effective.id, entry.id, "original row survives");
        assert_eq!(effective.status, EntryStatus::Active);
    }

    #[test]
    fn test_complete_run_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        let run = store
            .create_run(&entry, TriggerType::Scheduled, entry.next_run_at)
            .unwrap();

        let mut first = RunCompletion::failed("boom");
        first.summary = Some("first".into());
        assert!(store.complete_run(&run.id, &first).unwrap());

        let mut second = RunCompletion::failed("other");
        second.summary = Some("second".into());
        assert!(!store.complete_run(&run.id, &second).unwrap());

        let stored = store.get_run(&run.id).unwrap();
        assert_eq!(stored.summary.as_deref(), Some("first"));
        assert_eq!(stored.status, RunStatus::Failed);
    }

    #[test]
    fn test_advance_schedule_writes_both_fields() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        let last = Utc::now();
        let next = last + Duration::days(1);
        store
            .advance_schedule(&entry.id, last, Some(next))
            .unwrap();

        let stored = store.get_monitoring_entry(&entry.id).unwrap();
        assert!(stored.last_run_at.is_some());
        let gap = stored.next_run_at.unwrap() - stored.last_run_at.unwrap();
        assert_eq!(gap.num_days(), 1);
    }

    #[test]
    fn test_increment_usage_floors_at_zero() {
        let store = Store::open_in_memory().unwrap();
        let tenant = blank_tenant("acme", PlanSnapshot::default());
        store.upsert_tenant(&tenant).unwrap();

        assert_eq!(
            store
                .increment_usage(&tenant.id, UsageKind::Email, 1)
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .increment_usage(&tenant.id, UsageKind::Email, -5)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_remove_repository_pauses_entries() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        let paused = store.remove_repository(&entry.repository_id).unwrap();
        assert_eq!(paused, 1);
        let stored = store.get_monitoring_entry(&entry.id).unwrap();
        assert_eq!(stored.status, EntryStatus::Paused);
        let repo = store.get_repository(&entry.repository_id).unwrap();
        assert_eq!(repo.status, RepoStatus::Removed);
    }

    #[test]
    fn test_stale_started_runs_listed() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        let run = store
            .create_run(&entry, TriggerType::Scheduled, None)
            .unwrap();

        let stale = store
            .list_stale_started_runs(Utc::now() + Duration::seconds(1))
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, run.id);

        let none = store
            .list_stale_started_runs(Utc::now() - Duration::minutes(10))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_oversized_note_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut entry = seed(&store);
        entry.note = Some("x".repeat(MAX_NOTE_CHARS + 1));
        assert!(store.upsert_monitoring_entry(&entry).is_err());
    }

    #[test]
    fn test_invite_accepted_flips_mode() {
        let store = Store::open_in_memory().unwrap();
        let entry = seed(&store);
        assert_eq!(entry.mode, MonitorMode::Ghost);
        store.set_invite_accepted(&entry.id).unwrap();
        let stored = store.get_monitoring_entry(&entry.id).unwrap();
        assert_eq!(stored.mode, MonitorMode::Open);
    }

    #[test]
    fn test_plan_update_leaves_usage_untouched() {
        let store = Store::open_in_memory().unwrap();
        let tenant = blank_tenant("acme", PlanSnapshot::default());
        store.upsert_tenant(&tenant).unwrap();
        store
            .increment_usage(&tenant.id, UsageKind::Email, 7)
            .unwrap();

        let pro = PlanSnapshot {
            name: "pro".into(),
            max_repos: 10,
            max_authors: 25,
            max_emails_per_month: 500,
        };
        store
            .apply_plan_update(&tenant.id, SubscriptionStatus::Active, &pro)
            .unwrap();

        let stored = store.get_tenant_with_limits(&tenant.id).unwrap();
        assert_eq!(stored.plan.max_emails_per_month, 500);
        assert_eq!(stored.usage.emails_sent_this_month, 7);
        assert_eq!(stored.subscription, SubscriptionStatus::Active);
    }
}
