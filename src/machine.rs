//! Lifecycle state machine.
//!
//! Pure decision logic: given a tenant's current record and an incoming
//! event, compute the next record or reject the event. Deterministic, no
//! I/O; the transition executor owns reads, writes, and auditing.

use serde::{Deserialize, Serialize};

use crate::tenant::{TenantStatus, TenantSubscription};

/// An event that may transition a tenant's lifecycle state.
///
/// Events are ephemeral; they are not persisted beyond the audit record
/// written for the attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// The client observed the trial clock lapse.
    TrialExpired,
    /// The payment gateway confirmed a charge for `plan_id`.
    PaymentConfirmed {
        /// The plan that was paid for.
        plan_id: String,
        /// Opaque provider subscription id from the gateway.
        provider_subscription_id: String,
        /// Advisory next billing date, if the gateway reported one.
        next_billing_date: Option<u64>,
    },
    /// The payment gateway reported a failed recurring charge.
    PaymentFailed,
    /// Privileged break-glass toggle of the bypass flag.
    AdminOverride {
        /// True to enable the emergency unlock, false to remove it.
        enable: bool,
    },
    /// The retention window has elapsed for an archived tenant; signals
    /// purge eligibility, not a status change.
    RetentionElapsed,
}

impl TransitionEvent {
    /// Stable event kind string for audit records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TrialExpired => "trial_expired",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::PaymentFailed => "payment_failed",
            Self::AdminOverride { enable: true } => "admin_override_enable",
            Self::AdminOverride { enable: false } => "admin_override_disable",
            Self::RetentionElapsed => "retention_elapsed",
        }
    }
}

/// The accepted result of evaluating an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextState {
    /// The record after applying the event. Version bumping is the
    /// executor's responsibility.
    pub record: TenantSubscription,
    /// False when the event was accepted but left the record untouched
    /// (trial expiry, retention eligibility); the executor skips the
    /// store write in that case.
    pub changed: bool,
}

/// A rejected event. Rejection never mutates state and is still audited.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum Rejection {
    /// The event does not match any transition row for the current state.
    #[error("invalid transition")]
    InvalidTransition {
        /// Status the tenant was in when the event arrived.
        status: TenantStatus,
        /// Kind of the rejected event.
        event: String,
    },
}

/// Deterministic transition rules for the tenant lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    retention_window_secs: u64,
}

impl StateMachine {
    /// Create a state machine with the given retention window.
    #[must_use]
    pub fn new(retention_window_secs: u64) -> Self {
        Self {
            retention_window_secs,
        }
    }

    /// The configured retention window in seconds.
    #[must_use]
    pub fn retention_window_secs(&self) -> u64 {
        self.retention_window_secs
    }

    /// Evaluate one event against the current record.
    ///
    /// Returns the next record, or a rejection if no transition row
    /// matches the current state.
    pub fn evaluate(
        &self,
        current: &TenantSubscription,
        event: &TransitionEvent,
        now: u64,
    ) -> Result<NextState, Rejection> {
        match (current.status, event) {
            // Trial expiry changes the computed entitlement, not the
            // stored status. A late payment then needs no "undo" of an
            // archival.
            (TenantStatus::Trial, TransitionEvent::TrialExpired)
                if current.trial_expired(now) =>
            {
                Ok(NextState {
                    record: current.clone(),
                    changed: false,
                })
            }

            (
                TenantStatus::Trial | TenantStatus::PastDue | TenantStatus::Archived,
                TransitionEvent::PaymentConfirmed {
                    provider_subscription_id,
                    next_billing_date,
                    ..
                },
            ) => {
                let mut next = current.clone();
                next.status = TenantStatus::Active;
                // Write-once: an already-recorded provider id is kept.
                if next.provider_subscription_id.is_none() {
                    next.provider_subscription_id = Some(provider_subscription_id.clone());
                }
                next.next_billing_date = *next_billing_date;
                // Reactivation leaves archived status behind, so the
                // archived_at <=> archived invariant must be restored.
                next.archived_at = None;
                Ok(NextState {
                    record: next,
                    changed: true,
                })
            }

            (TenantStatus::Active, TransitionEvent::PaymentFailed) => {
                let mut next = current.clone();
                next.status = TenantStatus::PastDue;
                Ok(NextState {
                    record: next,
                    changed: true,
                })
            }

            (_, TransitionEvent::AdminOverride { enable: true }) => {
                let mut next = current.clone();
                next.bypass = true;
                Ok(NextState {
                    record: next,
                    changed: !current.bypass,
                })
            }

            (_, TransitionEvent::AdminOverride { enable: false }) => {
                let mut next = current.clone();
                next.bypass = false;
                // Disabling the override removes the safety net. An
                // "active" record that never saw a real payment
                // confirmation falls back to past_due rather than
                // keeping unearned access.
                if current.bypass
                    && current.status == TenantStatus::Active
                    && current.provider_subscription_id.is_none()
                {
                    next.status = TenantStatus::PastDue;
                }
                Ok(NextState {
                    changed: next != *current,
                    record: next,
                })
            }

            (TenantStatus::Archived, TransitionEvent::RetentionElapsed)
                if self.retention_elapsed(current, now) =>
            {
                Ok(NextState {
                    record: current.clone(),
                    changed: false,
                })
            }

            _ => Err(Rejection::InvalidTransition {
                status: current.status,
                event: event.kind().to_string(),
            }),
        }
    }

    /// Whether an archived record has aged past the retention window.
    /// A missing `archived_at` is never eligible.
    #[must_use]
    pub fn retention_elapsed(&self, record: &TenantSubscription, now: u64) -> bool {
        record.is_archived()
            && record
                .archived_at
                .is_some_and(|at| now.saturating_sub(at) > self.retention_window_secs)
    }
}
