//! Entitlement gate.
//!
//! The read-side check consulted on every protected operation. A pure
//! function of the record, the clock, and the requested path: no hidden
//! state, trivially parallel, snapshot-testable.

use serde::{Deserialize, Serialize};

use crate::tenant::{TenantStatus, TenantSubscription};

/// Why a decision came out the way it did. Serialized snake_case for UI
/// messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The emergency bypass flag is set.
    Override,
    /// A non-trial, non-archived status; treated as paid.
    Subscribed,
    /// Trial is still within its window.
    TrialActive,
    /// The requested path is in the always-allowed set, so a locked-out
    /// tenant can still reach the page that lets them pay.
    BillingPath,
    /// Trial window has lapsed without payment.
    TrialExpired,
    /// Tenant is archived.
    Archived,
}

impl DecisionReason {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Subscribed => "subscribed",
            Self::TrialActive => "trial_active",
            Self::BillingPath => "billing_path",
            Self::TrialExpired => "trial_expired",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The gate's allow/deny decision plus the reason for UI messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct EntitlementDecision {
    /// Whether the tenant may proceed.
    pub allowed: bool,
    /// Why.
    pub reason: DecisionReason,
}

impl EntitlementDecision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Policy for mapping a tenant record to an entitlement decision.
///
/// `bypass` and `status` can change asynchronously (a webhook can land
/// mid-session), so callers must re-check on every protected boundary
/// rather than caching beyond a short client-side window.
#[derive(Debug, Clone)]
pub struct EntitlementGate {
    billing_paths: Vec<String>,
}

impl EntitlementGate {
    /// Create a gate with the given always-allowed path prefixes.
    #[must_use]
    pub fn new(billing_paths: Vec<String>) -> Self {
        Self { billing_paths }
    }

    /// Whether `path` is in the always-allowed set.
    #[must_use]
    pub fn is_billing_path(&self, path: &str) -> bool {
        self.billing_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Path-independent policy (rules 1-3 and 5): override, then
    /// non-trial statuses, then the trial window.
    pub fn decide(&self, record: &TenantSubscription, now: u64) -> EntitlementDecision {
        if record.bypass {
            return EntitlementDecision::allow(DecisionReason::Override);
        }

        match record.status {
            TenantStatus::Archived => EntitlementDecision::deny(DecisionReason::Archived),
            // Anything other than trial is currently treated as paid;
            // no past_due grace policy is layered on top.
            TenantStatus::Active | TenantStatus::PastDue => {
                EntitlementDecision::allow(DecisionReason::Subscribed)
            }
            TenantStatus::Trial => {
                if record.trial_expired(now) {
                    EntitlementDecision::deny(DecisionReason::TrialExpired)
                } else {
                    EntitlementDecision::allow(DecisionReason::TrialActive)
                }
            }
        }
    }

    /// Full policy including rule 4: a denied tenant is still allowed
    /// through to the billing entry point.
    pub fn check(
        &self,
        record: &TenantSubscription,
        now: u64,
        path: &str,
    ) -> EntitlementDecision {
        let decision = self.decide(record, now);
        if !decision.allowed && self.is_billing_path(path) {
            return EntitlementDecision::allow(DecisionReason::BillingPath);
        }
        decision
    }
}

impl Default for EntitlementGate {
    fn default() -> Self {
        Self::new(vec!["/billing".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::DAY_SECS;

    const T0: u64 = 1_700_000_000;

    fn gate() -> EntitlementGate {
        EntitlementGate::default()
    }

    fn trial_record() -> TenantSubscription {
        TenantSubscription::new_trial("clinic_1", T0, 14)
    }

    #[test]
    fn trial_inside_window_allowed() {
        let decision = gate().check(&trial_record(), T0 + 13 * DAY_SECS, "/dashboard");
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::TrialActive);
    }

    #[test]
    fn trial_past_window_denied() {
        let decision = gate().check(&trial_record(), T0 + 15 * DAY_SECS, "/dashboard");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::TrialExpired);
    }

    #[test]
    fn expired_trial_still_reaches_billing() {
        let decision = gate().check(&trial_record(), T0 + 15 * DAY_SECS, "/billing/checkout");
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::BillingPath);
    }

    #[test]
    fn unset_trial_end_allowed() {
        let mut record = trial_record();
        record.trial_ends_at = None;
        let decision = gate().check(&record, u64::MAX, "/dashboard");
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::TrialActive);
    }

    #[test]
    fn bypass_wins_over_everything() {
        let mut record = trial_record();
        record.status = TenantStatus::Archived;
        record.archived_at = Some(T0);
        record.bypass = true;

        let decision = gate().check(&record, u64::MAX, "/dashboard");
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Override);
    }

    #[test]
    fn past_due_treated_as_subscribed() {
        let mut record = trial_record();
        record.status = TenantStatus::PastDue;
        let decision = gate().check(&record, u64::MAX, "/dashboard");
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Subscribed);
    }

    #[test]
    fn archived_denied_except_billing() {
        let mut record = trial_record();
        record.status = TenantStatus::Archived;
        record.archived_at = Some(T0);

        let denied = gate().check(&record, T0, "/dashboard");
        assert!(!denied.allowed);
        assert_eq!(denied.reason, DecisionReason::Archived);

        let billing = gate().check(&record, T0, "/billing");
        assert!(billing.allowed);
        assert_eq!(billing.reason, DecisionReason::BillingPath);
    }

    #[test]
    fn decision_is_deterministic() {
        let record = trial_record();
        let a = gate().check(&record, T0 + DAY_SECS, "/dashboard");
        let b = gate().check(&record, T0 + DAY_SECS, "/dashboard");
        assert_eq!(a, b);
    }
}
