//! Audit sink.
//!
//! Append-only log of every transition and purge attempt, success or
//! failure. The sink doubles as the executor's idempotency index: the
//! `(tenant_id, idempotency_key)` lookup is what makes redelivered
//! webhooks and double-clicked admin actions no-ops.
//!
//! Append failures are engine failures. A transition whose audit record
//! cannot be written has not completed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::tenant::TenantStatus;

/// Who caused a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The tenant's own client (trial clock observation).
    Client,
    /// The payment gateway webhook.
    Webhook,
    /// A privileged caller holding the shared admin secret.
    AdminSecret,
    /// The retention scheduler.
    Scheduler,
}

impl Actor {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Webhook => "webhook",
            Self::AdminSecret => "admin_secret",
            Self::Scheduler => "scheduler",
        }
    }
}

/// How a transition attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The transition was accepted and any write completed.
    Applied,
    /// The state machine rejected the event; nothing was mutated.
    Rejected,
    /// A side effect failed (gateway, store conflict, storage).
    Failed,
}

/// One appended audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    /// Record id.
    pub id: Uuid,
    /// Tenant the attempt targeted.
    pub tenant_id: String,
    /// Causal idempotency key for the attempt.
    pub idempotency_key: String,
    /// Event kind string (see [`TransitionEvent::kind`]).
    ///
    /// [`TransitionEvent::kind`]: crate::machine::TransitionEvent::kind
    pub event_kind: String,
    /// Status before the attempt. Absent for security events recorded
    /// before the tenant record could be consulted.
    pub previous_status: Option<TenantStatus>,
    /// Status after the attempt (equal to `previous_status` for rejected
    /// and failed attempts).
    pub new_status: Option<TenantStatus>,
    /// Who caused the attempt.
    pub actor: Actor,
    /// When the attempt was recorded, Unix seconds.
    pub timestamp: u64,
    /// How it ended.
    pub outcome: AuditOutcome,
    /// Free-form detail (rejection reason, gateway failure, provider id).
    pub detail: Option<String>,
}

impl AuditRecord {
    /// Build a record with a fresh id and the current time.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: impl Into<String>,
        idempotency_key: impl Into<String>,
        event_kind: impl Into<String>,
        previous_status: impl Into<Option<TenantStatus>>,
        new_status: impl Into<Option<TenantStatus>>,
        actor: Actor,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            idempotency_key: idempotency_key.into(),
            event_kind: event_kind.into(),
            previous_status: previous_status.into(),
            new_status: new_status.into(),
            actor,
            timestamp: crate::tenant::unix_now(),
            outcome,
            detail,
        }
    }
}

/// Append-only audit backend.
pub trait AuditSink: Send + Sync {
    /// Append one record. Failures must surface; best-effort is not
    /// acceptable here.
    async fn append(&self, record: AuditRecord) -> Result<()>;

    /// Find an already-applied record for `(tenant_id, idempotency_key)`.
    ///
    /// Only `Applied` outcomes participate: rejected and failed attempts
    /// may be retried under the same key.
    async fn find_applied(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<AuditRecord>>;
}

/// Audit sink that logs through `tracing` and retains nothing.
///
/// Development only: it cannot answer `find_applied`, so idempotent
/// replay detection is disabled with this sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        tracing::info!(
            target: "entitle::audit",
            tenant_id = %record.tenant_id,
            event_kind = %record.event_kind,
            previous_status = ?record.previous_status,
            new_status = ?record.new_status,
            actor = record.actor.as_str(),
            outcome = ?record.outcome,
            detail = record.detail.as_deref().unwrap_or(""),
            "Transition audited"
        );
        Ok(())
    }

    async fn find_applied(
        &self,
        _tenant_id: &str,
        _idempotency_key: &str,
    ) -> Result<Option<AuditRecord>> {
        Ok(None)
    }
}

/// In-memory audit sink for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::{Arc, RwLock};

    /// Capturing in-memory sink. Wraps data in `Arc` for cheap cloning.
    #[derive(Clone, Default)]
    pub struct MemoryAuditSink {
        records: Arc<RwLock<Vec<AuditRecord>>>,
        fail_appends: Arc<RwLock<bool>>,
    }

    impl MemoryAuditSink {
        /// Create an empty sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All records appended so far.
        pub fn records(&self) -> Vec<AuditRecord> {
            self.records.read().unwrap().clone()
        }

        /// Records for one tenant.
        pub fn records_for(&self, tenant_id: &str) -> Vec<AuditRecord> {
            self.records
                .read()
                .unwrap()
                .iter()
                .filter(|r| r.tenant_id == tenant_id)
                .cloned()
                .collect()
        }

        /// Make every subsequent append fail, to exercise the
        /// surfaced-not-swallowed contract.
        pub fn fail_appends(&self, fail: bool) {
            *self.fail_appends.write().unwrap() = fail;
        }
    }

    impl AuditSink for MemoryAuditSink {
        async fn append(&self, record: AuditRecord) -> Result<()> {
            if *self.fail_appends.read().unwrap() {
                return Err(crate::error::EngineError::Audit(
                    "audit sink unavailable".to_string(),
                ));
            }
            self.records.write().unwrap().push(record);
            Ok(())
        }

        async fn find_applied(
            &self,
            tenant_id: &str,
            idempotency_key: &str,
        ) -> Result<Option<AuditRecord>> {
            Ok(self
                .records
                .read()
                .unwrap()
                .iter()
                .find(|r| {
                    r.tenant_id == tenant_id
                        && r.idempotency_key == idempotency_key
                        && r.outcome == AuditOutcome::Applied
                })
                .cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MemoryAuditSink;
    use super::*;

    fn record(key: &str, outcome: AuditOutcome) -> AuditRecord {
        AuditRecord::new(
            "clinic_1",
            key,
            "payment_confirmed",
            TenantStatus::Trial,
            TenantStatus::Active,
            Actor::Webhook,
            outcome,
            None,
        )
    }

    #[tokio::test]
    async fn find_applied_matches_only_applied_outcomes() {
        let sink = MemoryAuditSink::new();
        sink.append(record("k1", AuditOutcome::Rejected)).await.unwrap();
        sink.append(record("k1", AuditOutcome::Failed)).await.unwrap();

        assert!(sink.find_applied("clinic_1", "k1").await.unwrap().is_none());

        sink.append(record("k1", AuditOutcome::Applied)).await.unwrap();
        let found = sink.find_applied("clinic_1", "k1").await.unwrap().unwrap();
        assert_eq!(found.outcome, AuditOutcome::Applied);
    }

    #[tokio::test]
    async fn find_applied_is_keyed_per_tenant() {
        let sink = MemoryAuditSink::new();
        sink.append(record("k1", AuditOutcome::Applied)).await.unwrap();

        assert!(sink.find_applied("clinic_2", "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_sink_surfaces_error() {
        let sink = MemoryAuditSink::new();
        sink.fail_appends(true);
        let result = sink.append(record("k1", AuditOutcome::Applied)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tracing_sink_accepts_appends() {
        let sink = TracingAuditSink;
        sink.append(record("k1", AuditOutcome::Applied)).await.unwrap();
        assert!(sink.find_applied("clinic_1", "k1").await.unwrap().is_none());
    }
}
