//! Quota gate — admission control against a tenant's plan snapshot.
//!
//! Admission is optimistic: `can_consume` reads the counters,
//! `consume` increments them, and a concurrent increment between the
//! two resolves in favour of the increment. The overshoot stays
//! visible in the usage counters.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};

use prdigest_core::error::{DigestError, Result};
use prdigest_core::types::Tenant;

use crate::db::{Store, UsageKind};

/// Admission and accounting for plan-limited resources.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<Store>,
}

impl QuotaGate {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// True iff the tenant may consume one more unit of `kind`.
    /// Accessing the email counter lazily rolls the usage period over.
    pub fn can_consume(&self, tenant_id: &str, kind: UsageKind) -> Result<bool> {
        let tenant = self.tenant_with_current_period(tenant_id, Utc::now())?;
        Ok(usage_of(&tenant, kind) < limit_of(&tenant, kind))
    }

    /// Admission check followed by the increment. Under a race the
    /// increment wins; the caller observes the new value either way.
    pub fn consume(&self, tenant_id: &str, kind: UsageKind) -> Result<u32> {
        let tenant = self.tenant_with_current_period(tenant_id, Utc::now())?;
        if usage_of(&tenant, kind) >= limit_of(&tenant, kind) {
            return Err(DigestError::Quota(format!(
                "{} limit reached for tenant {tenant_id}",
                kind_name(kind)
            )));
        }
        self.store.increment_usage(tenant_id, kind, 1)
    }

    /// Unconditional increment for a unit already spent (the email was
    /// sent; the counter must reflect it even past the cap).
    pub fn record(&self, tenant_id: &str, kind: UsageKind) -> Result<u32> {
        self.store.increment_usage(tenant_id, kind, 1)
    }

    /// Give a unit back on resource removal, floored at zero.
    pub fn release(&self, tenant_id: &str, kind: UsageKind) -> Result<u32> {
        self.store.increment_usage(tenant_id, kind, -1)
    }

    /// Fetch the tenant, resetting the email counter if the billing
    /// period has rolled over since the last access.
    fn tenant_with_current_period(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<Tenant> {
        let mut tenant = self.store.get_tenant_with_limits(tenant_id)?;
        if let Some(new_start) = rolled_period_start(tenant.usage.usage_period_start, now) {
            tracing::info!(
                tenant = %tenant_id,
                period_start = %new_start,
                "usage period rolled over, email counter reset"
            );
            self.store.reset_usage_period(tenant_id, new_start)?;
            tenant.usage.emails_sent_this_month = 0;
            tenant.usage.usage_period_start = new_start;
        }
        Ok(tenant)
    }
}

/// If `now` is at least one month past `start`, the new period start:
/// `start` advanced by whole months until within one month of `now`.
fn rolled_period_start(start: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut current = start;
    let mut rolled = false;
    while let Some(next) = current.checked_add_months(Months::new(1)) {
        if next > now {
            break;
        }
        current = next;
        rolled = true;
    }
    rolled.then_some(current)
}

fn usage_of(tenant: &Tenant, kind: UsageKind) -> u32 {
    match kind {
        UsageKind::Repo => tenant.usage.repos_count,
        UsageKind::Author => tenant.usage.authors_count,
        UsageKind::Email => tenant.usage.emails_sent_this_month,
    }
}

fn limit_of(tenant: &Tenant, kind: UsageKind) -> u32 {
    match kind {
        UsageKind::Repo => tenant.plan.max_repos,
        UsageKind::Author => tenant.plan.max_authors,
        UsageKind::Email => tenant.plan.max_emails_per_month,
    }
}

fn kind_name(kind: UsageKind) -> &'static str {
    match kind {
        UsageKind::Repo => "repository",
        UsageKind::Author => "author",
        UsageKind::Email => "monthly email",
    }
}
