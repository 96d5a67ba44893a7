//! Top-level engine facade.
//!
//! [`EntitlementEngine`] wires the store, payment gateway, audit sink,
//! state machine, gate, and webhook verifier together behind the small
//! set of operations callers actually invoke. Construct one per process
//! and share it; every operation takes `&self`.

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::audit::{Actor, AuditOutcome, AuditRecord, AuditSink};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{
    ExecutionResult, PaymentOutcome, PaymentRequest, TransitionCommand, TransitionExecutor,
};
use crate::gate::{EntitlementDecision, EntitlementGate};
use crate::gateway::{PaymentGateway, TimeoutGateway};
use crate::machine::{StateMachine, TransitionEvent};
use crate::plans::PlanCatalog;
use crate::store::TenantStore;
use crate::sweeper::{RetentionSweeper, SweepSummary};
use crate::tenant::{unix_now, TenantSubscription};
use crate::webhook::{WebhookOutcome, WebhookVerifier};

/// The engine facade over all tenant lifecycle operations.
pub struct EntitlementEngine<S, G, A> {
    executor: TransitionExecutor<S, TimeoutGateway<G>, A>,
    sweeper: RetentionSweeper<S, A>,
    verifier: WebhookVerifier,
    admin_secret: SecretString,
    trial_days: u32,
}

impl<S, G, A> EntitlementEngine<S, G, A>
where
    S: TenantStore + Clone,
    G: PaymentGateway,
    A: AuditSink + Clone,
{
    /// Wires an engine from its collaborators and configuration.
    ///
    /// The gateway is wrapped in a [`TimeoutGateway`] using the
    /// configured timeout, so callers pass the raw adapter.
    pub fn new(store: S, gateway: G, audit: A, plans: PlanCatalog, config: EngineConfig) -> Self {
        let machine = StateMachine::new(config.retention_window_secs());
        let gate = EntitlementGate::new(config.billing_paths.clone());
        let verifier = WebhookVerifier::new(
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs as i64,
        );
        let sweeper = RetentionSweeper::new(store.clone(), audit.clone(), machine.clone());
        let executor = TransitionExecutor::new(
            store,
            TimeoutGateway::new(gateway, config.gateway_timeout),
            audit,
            machine,
            gate,
            plans,
        );
        Self {
            executor,
            sweeper,
            verifier,
            admin_secret: config.admin_secret,
            trial_days: config.trial_days,
        }
    }

    /// Creates a new tenant in trial status.
    ///
    /// Fails with a conflict if the tenant already exists.
    pub async fn provision_tenant(&self, tenant_id: &str) -> Result<TenantSubscription> {
        if tenant_id.is_empty() {
            return Err(EngineError::Validation("tenant_id must not be empty".into()));
        }
        let record = TenantSubscription::new_trial(tenant_id, unix_now(), self.trial_days);
        self.executor.store().insert(&record).await?;
        tracing::info!(
            target: "entitle::engine",
            tenant_id,
            trial_ends_at = ?record.trial_ends_at,
            "tenant provisioned"
        );
        Ok(record)
    }

    /// Evaluates whether a tenant may access the given request path.
    pub async fn check_entitlement(
        &self,
        tenant_id: &str,
        path: &str,
    ) -> Result<EntitlementDecision> {
        let record = self.get_record(tenant_id).await?;
        Ok(self.executor.gate().check(&record, unix_now(), path))
    }

    /// Charges the tenant through the payment gateway and activates the
    /// subscription on success. Deduplicated by the request's
    /// idempotency key before any money moves.
    pub async fn submit_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome> {
        self.executor.submit_payment(request).await
    }

    /// Records an observed trial expiry for a tenant.
    ///
    /// Expiry is recomputed from the stored record, so reporting it for
    /// a tenant whose trial is still running is accepted without effect.
    pub async fn report_trial_expired(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<ExecutionResult> {
        self.executor
            .apply(TransitionCommand {
                tenant_id: tenant_id.to_string(),
                event: TransitionEvent::TrialExpired,
                idempotency_key: idempotency_key.to_string(),
                actor: Actor::Client,
            })
            .await
    }

    /// Verifies and processes a raw webhook delivery.
    ///
    /// Signature and timestamp failures return an error so the caller
    /// can respond with a rejection status. Event types the engine does
    /// not act on are acknowledged as [`WebhookOutcome::Ignored`], and
    /// redelivered events as [`WebhookOutcome::AlreadyProcessed`].
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        let event = self.verifier.verify(payload, signature)?;
        let Some(command) = self.verifier.to_command(&event)? else {
            tracing::debug!(
                target: "entitle::engine",
                event_id = %event.id,
                event_type = %event.event_type,
                "webhook event ignored"
            );
            return Ok(WebhookOutcome::Ignored);
        };
        match self.executor.apply(command).await {
            Ok(result) if result.replayed => Ok(WebhookOutcome::AlreadyProcessed),
            Ok(_) => Ok(WebhookOutcome::Processed),
            Err(EngineError::Validation(reason)) => {
                tracing::warn!(
                    target: "entitle::engine",
                    event_id = %event.id,
                    %reason,
                    "webhook event rejected"
                );
                Ok(WebhookOutcome::Rejected)
            }
            Err(err) => Err(err),
        }
    }

    /// Enables or disables the entitlement bypass on a tenant.
    ///
    /// Authenticated by the shared admin secret before the store is
    /// touched. Failed attempts are recorded as security events and
    /// return a generic unauthorized error.
    pub async fn apply_admin_override(
        &self,
        tenant_id: &str,
        enable: bool,
        admin_secret: &str,
        idempotency_key: &str,
    ) -> Result<ExecutionResult> {
        self.authorize(admin_secret, tenant_id, idempotency_key)
            .await?;
        self.executor
            .apply(TransitionCommand {
                tenant_id: tenant_id.to_string(),
                event: TransitionEvent::AdminOverride { enable },
                idempotency_key: idempotency_key.to_string(),
                actor: Actor::AdminSecret,
            })
            .await
    }

    /// Runs one retention sweep over archived tenants.
    ///
    /// Purging is irreversible, so the operation requires the admin
    /// secret like [`Self::apply_admin_override`].
    pub async fn run_retention_sweep(&self, admin_secret: &str) -> Result<SweepSummary> {
        self.authorize(admin_secret, "", "sweep").await?;
        self.sweeper.run().await
    }

    /// A handle to the sweeper for callers that schedule sweeps
    /// themselves, e.g. through [`crate::sweeper::SweepScheduler`].
    pub fn sweeper(&self) -> &RetentionSweeper<S, A> {
        &self.sweeper
    }

    async fn get_record(&self, tenant_id: &str) -> Result<TenantSubscription> {
        self.executor
            .store()
            .get(tenant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("tenant {tenant_id} not found")))
    }

    /// Constant-time comparison against the configured admin secret.
    async fn authorize(&self, provided: &str, tenant_id: &str, idempotency_key: &str) -> Result<()> {
        let expected = self.admin_secret.expose_secret().as_bytes();
        if provided.as_bytes().ct_eq(expected).into() {
            return Ok(());
        }
        tracing::warn!(
            target: "entitle::security",
            tenant_id,
            "admin operation rejected: bad secret"
        );
        self.executor
            .audit()
            .append(AuditRecord::new(
                tenant_id,
                idempotency_key,
                "admin_auth_failed",
                None,
                None,
                Actor::AdminSecret,
                AuditOutcome::Rejected,
                Some("invalid admin secret".to_string()),
            ))
            .await?;
        Err(EngineError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::test::MemoryAuditSink;
    use crate::gateway::test::MockPaymentGateway;
    use crate::store::test::InMemoryTenantStore;
    use crate::tenant::{TenantStatus, DAY_SECS};
    use crate::webhook::sign_payload;

    const ADMIN: &str = "admin-secret";
    const WHSEC: &str = "whsec-test";

    fn engine() -> EntitlementEngine<InMemoryTenantStore, MockPaymentGateway, MemoryAuditSink> {
        engine_with(MockPaymentGateway::default())
    }

    fn engine_with(
        gateway: MockPaymentGateway,
    ) -> EntitlementEngine<InMemoryTenantStore, MockPaymentGateway, MemoryAuditSink> {
        let config = EngineConfig::builder(ADMIN, WHSEC)
            .build()
            .unwrap_or_else(|err| panic!("config: {err}"));
        let plans = PlanCatalog::builder()
            .plan("starter")
            .amount_cents(2_900)
            .currency("usd")
            .period_days(30)
            .done()
            .build();
        EntitlementEngine::new(
            InMemoryTenantStore::new(),
            gateway,
            MemoryAuditSink::new(),
            plans,
            config,
        )
    }

    #[tokio::test]
    async fn provision_creates_trial_record() {
        let engine = engine();
        let record = engine.provision_tenant("acme").await.unwrap();
        assert_eq!(record.status, TenantStatus::Trial);
        assert!(record.trial_ends_at.is_some());

        let decision = engine.check_entitlement("acme", "/projects").await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn provisioning_twice_conflicts() {
        let engine = engine();
        engine.provision_tenant("acme").await.unwrap();
        let err = engine.provision_tenant("acme").await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn empty_tenant_id_is_rejected() {
        let engine = engine();
        let err = engine.provision_tenant("").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_tenant_entitlement_is_not_found() {
        let engine = engine();
        let err = engine.check_entitlement("ghost", "/").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn admin_override_requires_secret() {
        let engine = engine();
        engine.provision_tenant("acme").await.unwrap();

        let err = engine
            .apply_admin_override("acme", true, "wrong", "ovr-1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));
        // The generic message must not hint at what went wrong.
        assert_eq!(err.to_string(), "unauthorized");
    }

    #[tokio::test]
    async fn failed_admin_auth_is_audited() {
        let engine = engine();
        engine.provision_tenant("acme").await.unwrap();

        let _ = engine
            .apply_admin_override("acme", true, "wrong", "ovr-1")
            .await;
        let records = engine.executor.audit().records_for("acme");
        assert!(records
            .iter()
            .any(|r| r.event_kind == "admin_auth_failed"
                && r.outcome == AuditOutcome::Rejected
                && r.previous_status.is_none()));
    }

    #[tokio::test]
    async fn admin_override_bypasses_gate() {
        let engine = engine();
        let record = engine.provision_tenant("acme").await.unwrap();

        // Age the trial past its end.
        let mut expired = record.clone();
        expired.trial_ends_at = Some(unix_now() - DAY_SECS);
        engine.executor.store().seed(expired);

        let denied = engine.check_entitlement("acme", "/projects").await.unwrap();
        assert!(!denied.allowed);

        engine
            .apply_admin_override("acme", true, ADMIN, "ovr-1")
            .await
            .unwrap();
        let allowed = engine.check_entitlement("acme", "/projects").await.unwrap();
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn sweep_requires_secret() {
        let engine = engine();
        let err = engine.run_retention_sweep("wrong").await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));

        let summary = engine.run_retention_sweep(ADMIN).await.unwrap();
        assert_eq!(summary.processed, 0);
    }

    #[tokio::test]
    async fn webhook_round_trip_activates_tenant() {
        let engine = engine_with(MockPaymentGateway::succeeding("sub_1"));
        engine.provision_tenant("acme").await.unwrap();

        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "subscription.charge_succeeded",
            "created": unix_now(),
            "data": { "object": {
                "tenant_id": "acme",
                "subscription_id": "sub_1",
                "plan_id": "starter",
                "next_billing_date": unix_now() + 30 * DAY_SECS,
            }},
        })
        .to_string();
        let signature = sign_payload(WHSEC, payload.as_bytes(), unix_now() as i64);

        let outcome = engine
            .handle_webhook(payload.as_bytes(), &signature)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let record = engine.get_record("acme").await.unwrap();
        assert_eq!(record.status, TenantStatus::Active);
        assert_eq!(record.provider_subscription_id.as_deref(), Some("sub_1"));

        // Redelivery of the same event id is acknowledged, not re-applied.
        let outcome = engine
            .handle_webhook(payload.as_bytes(), &signature)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_errors() {
        let engine = engine();
        let payload = br#"{"id":"evt_1","type":"x","created":0,"data":{"object":{}}}"#;
        let signature = sign_payload("not-the-secret", payload, unix_now() as i64);
        let err = engine.handle_webhook(payload, &signature).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn unhandled_webhook_event_is_ignored() {
        let engine = engine();
        let payload = serde_json::json!({
            "id": "evt_2",
            "type": "invoice.finalized",
            "created": unix_now(),
            "data": { "object": {} },
        })
        .to_string();
        let signature = sign_payload(WHSEC, payload.as_bytes(), unix_now() as i64);
        let outcome = engine
            .handle_webhook(payload.as_bytes(), &signature)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }
}
