//! Tenant subscription records.
//!
//! One record per tenant, owned by the tenant record store. The record is
//! mutated exclusively through the transition executor; the entitlement
//! gate only ever reads it.

use serde::{Deserialize, Serialize};

/// Seconds in a day.
pub const DAY_SECS: u64 = 86_400;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Subscription status for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant is in its initial trial period.
    Trial,
    /// A payment has been confirmed; tenant is paid up.
    Active,
    /// A recurring payment failed; tenant keeps access pending retry.
    PastDue,
    /// Tenant has been archived and is counting down toward purge.
    Archived,
}

impl TenantStatus {
    /// Convert to the stable string form used in audit records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable subscription state for one tenant.
///
/// Timestamps are Unix seconds. `version` is the optimistic-concurrency
/// token for conditional writes; `updated_at` is advisory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantSubscription {
    /// Stable tenant identifier, immutable.
    pub tenant_id: String,
    /// Current lifecycle status.
    pub status: TenantStatus,
    /// End of the trial window. Meaningful while `status` is trial; kept
    /// for history afterwards, immutable once the tenant leaves trial.
    pub trial_ends_at: Option<u64>,
    /// Emergency override. When true the computed entitlement decision is
    /// bypassed regardless of `status`.
    pub bypass: bool,
    /// Opaque provider subscription id. Set at most once, when payment
    /// first succeeds; never cleared by this engine.
    pub provider_subscription_id: Option<String>,
    /// Advisory next billing date; not used for enforcement.
    pub next_billing_date: Option<u64>,
    /// When the tenant entered archived status. Set if and only if
    /// `status` is archived.
    pub archived_at: Option<u64>,
    /// Optimistic-concurrency token, bumped on every write.
    pub version: u64,
    /// Last write time.
    pub updated_at: u64,
}

impl TenantSubscription {
    /// Create the record for a freshly provisioned tenant: trial status
    /// with `trial_ends_at = now + trial_days`.
    #[must_use]
    pub fn new_trial(tenant_id: impl Into<String>, now: u64, trial_days: u32) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            status: TenantStatus::Trial,
            trial_ends_at: Some(now + u64::from(trial_days) * DAY_SECS),
            bypass: false,
            provider_subscription_id: None,
            next_billing_date: None,
            archived_at: None,
            version: 1,
            updated_at: now,
        }
    }

    /// Check if the tenant is in trial status.
    #[must_use]
    pub fn is_trialing(&self) -> bool {
        self.status == TenantStatus::Trial
    }

    /// Check if the trial window has lapsed at `now`. An unset
    /// `trial_ends_at` never counts as expired.
    #[must_use]
    pub fn trial_expired(&self, now: u64) -> bool {
        self.is_trialing() && self.trial_ends_at.is_some_and(|end| now > end)
    }

    /// Check if the tenant is archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.status == TenantStatus::Archived
    }

    /// Check if payment has failed.
    #[must_use]
    pub fn is_past_due(&self) -> bool {
        self.status == TenantStatus::PastDue
    }
}
