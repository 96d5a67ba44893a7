//! Transition executor.
//!
//! The write side of the engine: one causally-identified event is taken
//! end to end through idempotency check, state-machine evaluation,
//! conditional store write, and audit append. The executor is the only
//! writer of a tenant's record; unrelated tenants never contend because
//! serialization is per record via the version token, not a global lock.

use std::collections::HashMap;

use crate::audit::{Actor, AuditOutcome, AuditRecord, AuditSink};
use crate::error::{EngineError, Result};
use crate::gate::{EntitlementDecision, EntitlementGate};
use crate::gateway::{CreateSubscriptionRequest, PaymentGateway};
use crate::machine::{StateMachine, TransitionEvent};
use crate::plans::PlanCatalog;
use crate::store::TenantStore;
use crate::tenant::{unix_now, TenantStatus, DAY_SECS};

/// One causally-identified transition attempt.
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    /// Target tenant.
    pub tenant_id: String,
    /// The event to apply.
    pub event: TransitionEvent,
    /// Key derived from the causing fact (provider transaction id for
    /// payments, a nonce for admin actions). Redelivery under the same
    /// key is a no-op.
    pub idempotency_key: String,
    /// Who caused the attempt.
    pub actor: Actor,
}

/// Result of an executed (or replayed) transition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ExecutionResult {
    /// Status after the transition.
    pub status: TenantStatus,
    /// The resulting entitlement decision, so callers can react without
    /// a second read.
    pub decision: EntitlementDecision,
    /// True when the idempotency key matched an already-applied attempt
    /// and no side effects were re-executed.
    pub replayed: bool,
}

/// A client-initiated payment submission.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Target tenant.
    pub tenant_id: String,
    /// One-time card token from the client.
    pub token: String,
    /// Plan to subscribe to; must exist in the catalog.
    pub plan_id: String,
    /// Billing contact.
    pub billing_email: String,
    /// Stable idempotency key for the whole submission; also passed
    /// through to the provider.
    pub idempotency_key: String,
}

/// Result of a payment submission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct PaymentOutcome {
    /// The provider subscription id now on record.
    pub provider_subscription_id: String,
    /// The applied (or replayed) transition result.
    pub result: ExecutionResult,
}

/// Orchestrates transitions against the store, the gateway, and the
/// audit sink. All collaborators are injected; construction and teardown
/// belong to the process entry point.
pub struct TransitionExecutor<S, G, A> {
    store: S,
    gateway: G,
    audit: A,
    machine: StateMachine,
    gate: EntitlementGate,
    plans: PlanCatalog,
}

impl<S, G, A> TransitionExecutor<S, G, A>
where
    S: TenantStore,
    G: PaymentGateway,
    A: AuditSink,
{
    /// Create an executor from its collaborators.
    #[must_use]
    pub fn new(
        store: S,
        gateway: G,
        audit: A,
        machine: StateMachine,
        gate: EntitlementGate,
        plans: PlanCatalog,
    ) -> Self {
        Self {
            store,
            gateway,
            audit,
            machine,
            gate,
            plans,
        }
    }

    /// The injected store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The injected gate.
    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    /// The injected audit sink.
    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// The injected state machine.
    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Apply an already-established event (webhook delivery, trial
    /// expiry observation, admin override). Payment submissions that
    /// still need a gateway charge go through [`submit_payment`].
    ///
    /// [`submit_payment`]: Self::submit_payment
    pub async fn apply(&self, command: TransitionCommand) -> Result<ExecutionResult> {
        if let Some(prior) = self
            .audit
            .find_applied(&command.tenant_id, &command.idempotency_key)
            .await?
        {
            return self.replay(&command.tenant_id, &prior).await;
        }
        self.apply_fresh(&command, None).await
    }

    /// Submit a new payment: validate, charge through the gateway, then
    /// apply the confirmed transition.
    ///
    /// The dedup check runs before the gateway call, so a redelivered
    /// submission under the same key is never a second charge. On
    /// gateway failure nothing is written to the store; the attempt is
    /// audited as failed and the typed failure is surfaced.
    pub async fn submit_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome> {
        if let Some(prior) = self
            .audit
            .find_applied(&request.tenant_id, &request.idempotency_key)
            .await?
        {
            let result = self.replay(&request.tenant_id, &prior).await?;
            let record = self.read_record(&request.tenant_id).await?;
            return Ok(PaymentOutcome {
                provider_subscription_id: record.provider_subscription_id.unwrap_or_default(),
                result,
            });
        }

        let plan = self
            .plans
            .get(&request.plan_id)
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown plan id: {}", request.plan_id))
            })?
            .clone();

        let current = self.read_record(&request.tenant_id).await?;
        let now = unix_now();

        // Pre-flight: a tenant whose state cannot accept a payment is
        // rejected before any money moves.
        let preflight = TransitionEvent::PaymentConfirmed {
            plan_id: plan.id.clone(),
            provider_subscription_id: String::new(),
            next_billing_date: None,
        };
        if let Err(rejection) = self.machine.evaluate(&current, &preflight, now) {
            self.audit
                .append(AuditRecord::new(
                    &request.tenant_id,
                    &request.idempotency_key,
                    preflight.kind(),
                    current.status,
                    current.status,
                    Actor::Client,
                    AuditOutcome::Rejected,
                    Some(rejection.to_string()),
                ))
                .await?;
            return Err(EngineError::Validation(rejection.to_string()));
        }

        let mut metadata = HashMap::new();
        metadata.insert("tenant_id".to_string(), request.tenant_id.clone());
        let gateway_request = CreateSubscriptionRequest {
            token: request.token.clone(),
            plan_id: plan.id.clone(),
            amount_cents: plan.amount_cents,
            currency: plan.currency.clone(),
            billing_email: request.billing_email.clone(),
            idempotency_key: request.idempotency_key.clone(),
            metadata,
        };

        let subscription = match self.gateway.create_subscription(gateway_request).await {
            Ok(subscription) => subscription,
            Err(failure) => {
                tracing::warn!(
                    target: "entitle::executor",
                    tenant_id = %request.tenant_id,
                    plan_id = %request.plan_id,
                    error = %failure,
                    "Gateway rejected payment"
                );
                self.audit
                    .append(AuditRecord::new(
                        &request.tenant_id,
                        &request.idempotency_key,
                        "payment_confirmed",
                        current.status,
                        current.status,
                        Actor::Client,
                        AuditOutcome::Failed,
                        Some(failure.to_string()),
                    ))
                    .await?;
                return Err(failure.into());
            }
        };

        let next_billing_date = subscription
            .next_billing_date
            .or(Some(now + u64::from(plan.period_days) * DAY_SECS));
        let command = TransitionCommand {
            tenant_id: request.tenant_id.clone(),
            event: TransitionEvent::PaymentConfirmed {
                plan_id: plan.id,
                provider_subscription_id: subscription.provider_subscription_id.clone(),
                next_billing_date,
            },
            idempotency_key: request.idempotency_key,
            actor: Actor::Client,
        };
        let detail = format!(
            "provider_subscription_id={}",
            subscription.provider_subscription_id
        );
        let result = self.apply_fresh(&command, Some(detail)).await?;

        Ok(PaymentOutcome {
            provider_subscription_id: subscription.provider_subscription_id,
            result,
        })
    }

    /// Rebuild the result of an already-applied attempt from the current
    /// record, without re-executing side effects.
    async fn replay(&self, tenant_id: &str, prior: &AuditRecord) -> Result<ExecutionResult> {
        tracing::debug!(
            target: "entitle::executor",
            tenant_id,
            idempotency_key = %prior.idempotency_key,
            event_kind = %prior.event_kind,
            "Idempotent replay, side effects skipped"
        );
        let record = self.read_record(tenant_id).await?;
        Ok(ExecutionResult {
            status: record.status,
            decision: self.gate.decide(&record, unix_now()),
            replayed: true,
        })
    }

    /// Evaluate and persist one attempt: read, evaluate, conditional
    /// write with one retry from a fresh read, then fail closed. Exactly
    /// one audit record is appended, whatever the outcome.
    async fn apply_fresh(
        &self,
        command: &TransitionCommand,
        detail: Option<String>,
    ) -> Result<ExecutionResult> {
        let now = unix_now();
        let mut observed_status = None;

        for attempt in 0u32..2 {
            let current = self.read_record(&command.tenant_id).await?;
            observed_status = Some(current.status);

            let next = match self.machine.evaluate(&current, &command.event, now) {
                Ok(next) => next,
                Err(rejection) => {
                    self.audit
                        .append(AuditRecord::new(
                            &command.tenant_id,
                            &command.idempotency_key,
                            command.event.kind(),
                            current.status,
                            current.status,
                            command.actor,
                            AuditOutcome::Rejected,
                            Some(rejection.to_string()),
                        ))
                        .await?;
                    return Err(EngineError::Validation(rejection.to_string()));
                }
            };

            if !next.changed {
                self.audit
                    .append(AuditRecord::new(
                        &command.tenant_id,
                        &command.idempotency_key,
                        command.event.kind(),
                        current.status,
                        current.status,
                        command.actor,
                        AuditOutcome::Applied,
                        detail,
                    ))
                    .await?;
                return Ok(ExecutionResult {
                    status: current.status,
                    decision: self.gate.decide(&current, now),
                    replayed: false,
                });
            }

            let mut record = next.record;
            record.version = current.version + 1;
            record.updated_at = now;

            if self
                .store
                .conditional_update(&command.tenant_id, current.version, &record)
                .await?
            {
                self.audit
                    .append(AuditRecord::new(
                        &command.tenant_id,
                        &command.idempotency_key,
                        command.event.kind(),
                        current.status,
                        record.status,
                        command.actor,
                        AuditOutcome::Applied,
                        detail,
                    ))
                    .await?;
                tracing::info!(
                    target: "entitle::executor",
                    tenant_id = %command.tenant_id,
                    event_kind = command.event.kind(),
                    previous_status = %current.status,
                    new_status = %record.status,
                    actor = command.actor.as_str(),
                    "Transition applied"
                );
                return Ok(ExecutionResult {
                    status: record.status,
                    decision: self.gate.decide(&record, now),
                    replayed: false,
                });
            }

            tracing::warn!(
                target: "entitle::executor",
                tenant_id = %command.tenant_id,
                event_kind = command.event.kind(),
                attempt,
                "Version conflict on conditional write"
            );
        }

        // Fail closed: the loser re-reads and re-decides at the caller,
        // never silently overwrites the concurrent change.
        let status = observed_status.unwrap_or(TenantStatus::Trial);
        self.audit
            .append(AuditRecord::new(
                &command.tenant_id,
                &command.idempotency_key,
                command.event.kind(),
                status,
                status,
                command.actor,
                AuditOutcome::Failed,
                Some("version conflict after retry".to_string()),
            ))
            .await?;
        Err(EngineError::Conflict(format!(
            "concurrent update for tenant {}",
            command.tenant_id
        )))
    }

    async fn read_record(&self, tenant_id: &str) -> Result<crate::tenant::TenantSubscription> {
        self.store
            .get(tenant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(tenant_id.to_string()))
    }
}
