//! Retention sweeper.
//!
//! Scheduled, run-to-completion job that permanently removes tenants
//! dormant past the retention window. Purge is irreversible, so the
//! eligibility guard is re-checked against a fresh read immediately
//! before each purge: never a tenant outside archived status, never one
//! whose `archived_at` is missing or still inside the window, even under
//! event replay.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::audit::{Actor, AuditOutcome, AuditRecord, AuditSink};
use crate::error::Result;
use crate::machine::StateMachine;
use crate::store::TenantStore;
use crate::tenant::{unix_now, TenantStatus};

/// One tenant the sweep could not purge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepFailure {
    /// The tenant that failed.
    pub tenant_id: String,
    /// Why.
    pub reason: String,
}

/// Summary of one sweep run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[must_use]
pub struct SweepSummary {
    /// Candidates examined.
    pub processed: u64,
    /// Tenants irreversibly purged.
    pub purged: u64,
    /// Per-tenant failures; one tenant's failure never aborts the batch.
    pub failed: Vec<SweepFailure>,
}

/// Batch purge job over archived tenants.
pub struct RetentionSweeper<S, A> {
    store: S,
    audit: A,
    machine: StateMachine,
}

impl<S, A> RetentionSweeper<S, A>
where
    S: TenantStore,
    A: AuditSink,
{
    /// Create a sweeper from its collaborators.
    #[must_use]
    pub fn new(store: S, audit: A, machine: StateMachine) -> Self {
        Self {
            store,
            audit,
            machine,
        }
    }

    /// Run one sweep to completion.
    pub async fn run(&self) -> Result<SweepSummary> {
        let now = unix_now();
        let cutoff = now.saturating_sub(self.machine.retention_window_secs());
        let candidates = self.store.list_archived_before(cutoff).await?;

        tracing::info!(
            target: "entitle::sweeper",
            candidates = candidates.len(),
            cutoff,
            "Retention sweep started"
        );

        let mut summary = SweepSummary::default();
        for candidate in candidates {
            summary.processed += 1;
            match self.purge_one(&candidate.tenant_id, now).await {
                Ok(true) => summary.purged += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        target: "entitle::sweeper",
                        tenant_id = %candidate.tenant_id,
                        error = %e,
                        "Purge failed"
                    );
                    summary.failed.push(SweepFailure {
                        tenant_id: candidate.tenant_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            target: "entitle::sweeper",
            processed = summary.processed,
            purged = summary.purged,
            failed = summary.failed.len(),
            "Retention sweep finished"
        );
        Ok(summary)
    }

    /// Purge one candidate if, on a fresh read, it is still eligible.
    ///
    /// Returns `Ok(false)` when the candidate disappeared or stopped
    /// being eligible between listing and purging (a reactivation won
    /// the race); that is not a failure.
    async fn purge_one(&self, tenant_id: &str, now: u64) -> Result<bool> {
        let Some(record) = self.store.get(tenant_id).await? else {
            tracing::debug!(
                target: "entitle::sweeper",
                tenant_id,
                "Candidate already gone, skipping"
            );
            return Ok(false);
        };

        if !self.machine.retention_elapsed(&record, now) {
            tracing::warn!(
                target: "entitle::sweeper",
                tenant_id,
                status = %record.status,
                "Candidate no longer eligible, skipping purge"
            );
            self.audit
                .append(AuditRecord::new(
                    tenant_id,
                    purge_key(tenant_id, record.archived_at),
                    "retention_purge",
                    record.status,
                    record.status,
                    Actor::Scheduler,
                    AuditOutcome::Rejected,
                    Some("not eligible for purge".to_string()),
                ))
                .await?;
            return Ok(false);
        }

        match self.store.purge(tenant_id).await {
            Ok(()) => {
                self.audit
                    .append(AuditRecord::new(
                        tenant_id,
                        purge_key(tenant_id, record.archived_at),
                        "retention_purge",
                        TenantStatus::Archived,
                        TenantStatus::Archived,
                        Actor::Scheduler,
                        AuditOutcome::Applied,
                        None,
                    ))
                    .await?;
                tracing::info!(
                    target: "entitle::sweeper",
                    tenant_id,
                    "Tenant purged"
                );
                Ok(true)
            }
            Err(e) => {
                self.audit
                    .append(AuditRecord::new(
                        tenant_id,
                        purge_key(tenant_id, record.archived_at),
                        "retention_purge",
                        TenantStatus::Archived,
                        TenantStatus::Archived,
                        Actor::Scheduler,
                        AuditOutcome::Failed,
                        Some(e.to_string()),
                    ))
                    .await?;
                Err(e)
            }
        }
    }
}

/// Causal idempotency key for a purge attempt.
fn purge_key(tenant_id: &str, archived_at: Option<u64>) -> String {
    format!("purge:{}:{}", tenant_id, archived_at.unwrap_or_default())
}

/// Runs the sweeper on a fixed interval until shutdown.
pub struct SweepScheduler<S, A> {
    sweeper: RetentionSweeper<S, A>,
    interval: Duration,
    shutdown_tx: mpsc::Sender<()>,
}

impl<S, A> SweepScheduler<S, A>
where
    S: TenantStore,
    A: AuditSink,
{
    /// Create a scheduler. The returned receiver is handed back to
    /// [`start`](Self::start).
    pub fn new(
        sweeper: RetentionSweeper<S, A>,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                sweeper,
                interval,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Handle for requesting shutdown from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run sweeps until a shutdown signal arrives. The in-flight sweep
    /// finishes before the loop exits.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            target: "entitle::sweeper",
            interval_secs = self.interval.as_secs(),
            "Sweep scheduler started"
        );

        loop {
            if let Err(e) = self.sweeper.run().await {
                tracing::error!(
                    target: "entitle::sweeper",
                    error = %e,
                    "Sweep run failed"
                );
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(target: "entitle::sweeper", "Sweep scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::test::MemoryAuditSink;
    use crate::store::test::InMemoryTenantStore;
    use crate::tenant::{TenantSubscription, DAY_SECS};

    fn machine() -> StateMachine {
        StateMachine::new(90 * DAY_SECS)
    }

    fn archived(tenant_id: &str, archived_at: u64) -> TenantSubscription {
        let mut record = TenantSubscription::new_trial(tenant_id, archived_at, 14);
        record.status = TenantStatus::Archived;
        record.archived_at = Some(archived_at);
        record
    }

    #[tokio::test]
    async fn purges_only_aged_archived_tenants() {
        let store = InMemoryTenantStore::new();
        let now = unix_now();
        store.seed(archived("aged", now - 120 * DAY_SECS));
        store.seed(archived("recent", now - 10 * DAY_SECS));
        store.seed(TenantSubscription::new_trial("live", now, 14));

        let sweeper = RetentionSweeper::new(store.clone(), MemoryAuditSink::new(), machine());
        let summary = sweeper.run().await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.purged, 1);
        assert!(summary.failed.is_empty());
        assert_eq!(store.purged(), vec!["aged".to_string()]);
        assert!(store.get("recent").await.unwrap().is_some());
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let store = InMemoryTenantStore::new();
        let now = unix_now();
        store.seed(archived("a", now - 120 * DAY_SECS));
        store.seed(archived("b", now - 120 * DAY_SECS));
        store.seed(archived("c", now - 120 * DAY_SECS));
        store.fail_purge_for("b");

        let audit = MemoryAuditSink::new();
        let sweeper = RetentionSweeper::new(store.clone(), audit.clone(), machine());
        let summary = sweeper.run().await.unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.purged, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].tenant_id, "b");

        let failed = audit.records_for("b");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].outcome, AuditOutcome::Failed);
    }

    /// Store whose candidate listing is stale: it reports records that a
    /// concurrent writer has since reactivated.
    #[derive(Clone)]
    struct StaleListStore {
        inner: InMemoryTenantStore,
        stale: Vec<TenantSubscription>,
    }

    #[async_trait::async_trait]
    impl crate::store::TenantStore for StaleListStore {
        async fn get(&self, tenant_id: &str) -> crate::error::Result<Option<TenantSubscription>> {
            self.inner.get(tenant_id).await
        }

        async fn insert(&self, record: &TenantSubscription) -> crate::error::Result<()> {
            self.inner.insert(record).await
        }

        async fn conditional_update(
            &self,
            tenant_id: &str,
            expected_version: u64,
            record: &TenantSubscription,
        ) -> crate::error::Result<bool> {
            self.inner
                .conditional_update(tenant_id, expected_version, record)
                .await
        }

        async fn list_archived_before(
            &self,
            _cutoff: u64,
        ) -> crate::error::Result<Vec<TenantSubscription>> {
            Ok(self.stale.clone())
        }

        async fn purge(&self, tenant_id: &str) -> crate::error::Result<()> {
            self.inner.purge(tenant_id).await
        }
    }

    #[tokio::test]
    async fn reactivated_candidate_is_skipped() {
        let inner = InMemoryTenantStore::new();
        let now = unix_now();

        // Listed as archived, but by purge time the fresh read shows a
        // reactivated tenant.
        let stale = archived("clinic_1", now - 120 * DAY_SECS);
        let mut fresh = stale.clone();
        fresh.status = TenantStatus::Active;
        fresh.archived_at = None;
        inner.seed(fresh);

        let store = StaleListStore {
            inner: inner.clone(),
            stale: vec![stale],
        };
        let audit = MemoryAuditSink::new();
        let sweeper = RetentionSweeper::new(store, audit.clone(), machine());
        let summary = sweeper.run().await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.purged, 0);
        assert!(summary.failed.is_empty());
        assert!(inner.get("clinic_1").await.unwrap().is_some());

        let records = audit.records_for("clinic_1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test]
    async fn never_purges_without_archived_at() {
        let store = InMemoryTenantStore::new();
        let mut record = archived("clinic_1", 0);
        record.archived_at = None;
        store.seed(record);

        let sweeper = RetentionSweeper::new(store.clone(), MemoryAuditSink::new(), machine());
        let summary = sweeper.run().await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.purged, 0);
        assert!(store.get("clinic_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let store = InMemoryTenantStore::new();
        let sweeper = RetentionSweeper::new(store, MemoryAuditSink::new(), machine());
        let (scheduler, shutdown_rx) = SweepScheduler::new(sweeper, Duration::from_secs(3600));
        let shutdown = scheduler.shutdown_handle();

        let handle = tokio::spawn(scheduler.start(shutdown_rx));
        shutdown.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
