//! Payment gateway adapter.
//!
//! A pure boundary to the external recurring-billing provider. The
//! adapter performs no local state mutation; its result is the
//! authoritative input to the state machine. Idempotency is the
//! provider's: the caller's stable key is passed through, this engine
//! does not invent payment idempotency of its own.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Request to create a recurring subscription with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// One-time card token from the client.
    pub token: String,
    /// Internal plan id.
    pub plan_id: String,
    /// Charge amount in minor units.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Billing contact for the tenant.
    pub billing_email: String,
    /// Stable idempotency key, passed through to the provider so a
    /// redelivered request is not a second charge.
    pub idempotency_key: String,
    /// Free-form metadata forwarded to the provider.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Successful subscription creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySubscription {
    /// Opaque provider subscription id.
    pub provider_subscription_id: String,
    /// Next billing date reported by the provider, Unix seconds.
    pub next_billing_date: Option<u64>,
}

/// Typed failure from the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayFailure {
    /// The card token was invalid or already consumed.
    #[error("invalid payment token")]
    InvalidToken,
    /// The provider was unreachable or timed out.
    #[error("payment gateway unavailable")]
    GatewayUnavailable,
    /// The charge was declined.
    #[error("payment declined")]
    Declined {
        /// Provider-declared reason, where safe to expose.
        reason: Option<String>,
    },
    /// The adapter is misconfigured (bad credentials, unknown merchant).
    #[error("payment gateway misconfigured: {message}")]
    ConfigurationError {
        /// Operator-facing detail.
        message: String,
    },
}

impl GatewayFailure {
    /// Whether retrying the same request with the same idempotency key
    /// can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable)
    }
}

/// Client for the external recurring-billing provider.
pub trait PaymentGateway: Send + Sync {
    /// Create a subscription, charging the tenant's card.
    ///
    /// Must be safe to call twice with the same logical request; the
    /// provider deduplicates on the passed-through idempotency key.
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<GatewaySubscription, GatewayFailure>;
}

/// Decorator that bounds every gateway call with a timeout.
///
/// A timed-out call is reported as [`GatewayFailure::GatewayUnavailable`]
/// so the transition is rejected rather than left half-applied. No
/// operation in the engine blocks indefinitely.
#[derive(Debug, Clone)]
pub struct TimeoutGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G: PaymentGateway> TimeoutGateway<G> {
    /// Wrap `inner` with the given per-call timeout.
    #[must_use]
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<G: PaymentGateway> PaymentGateway for TimeoutGateway<G> {
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<GatewaySubscription, GatewayFailure> {
        match tokio::time::timeout(self.timeout, self.inner.create_subscription(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    target: "entitle::gateway",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Gateway call timed out"
                );
                Err(GatewayFailure::GatewayUnavailable)
            }
        }
    }
}

/// Mock payment gateway for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted gateway: returns a fixed response and records every
    /// request it sees.
    #[derive(Clone, Default)]
    pub struct MockPaymentGateway {
        inner: Arc<MockInner>,
    }

    #[derive(Default)]
    struct MockInner {
        response: Mutex<Option<Result<GatewaySubscription, GatewayFailure>>>,
        requests: Mutex<Vec<CreateSubscriptionRequest>>,
        calls: AtomicU32,
    }

    impl MockPaymentGateway {
        /// Create a mock that succeeds with the given provider id.
        #[must_use]
        pub fn succeeding(provider_subscription_id: &str) -> Self {
            let gateway = Self::default();
            gateway.respond_with(Ok(GatewaySubscription {
                provider_subscription_id: provider_subscription_id.to_string(),
                next_billing_date: None,
            }));
            gateway
        }

        /// Create a mock that fails with the given failure.
        #[must_use]
        pub fn failing(failure: GatewayFailure) -> Self {
            let gateway = Self::default();
            gateway.respond_with(Err(failure));
            gateway
        }

        /// Replace the scripted response.
        pub fn respond_with(&self, response: Result<GatewaySubscription, GatewayFailure>) {
            *self.inner.response.lock().unwrap() = Some(response);
        }

        /// Number of calls made so far.
        pub fn call_count(&self) -> u32 {
            self.inner.calls.load(Ordering::SeqCst)
        }

        /// Requests seen so far.
        pub fn requests(&self) -> Vec<CreateSubscriptionRequest> {
            self.inner.requests.lock().unwrap().clone()
        }
    }

    impl PaymentGateway for MockPaymentGateway {
        async fn create_subscription(
            &self,
            request: CreateSubscriptionRequest,
        ) -> Result<GatewaySubscription, GatewayFailure> {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.requests.lock().unwrap().push(request);
            self.inner
                .response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Err(GatewayFailure::ConfigurationError {
                    message: "mock gateway has no scripted response".to_string(),
                }))
        }
    }

    /// Gateway that never completes, for exercising the timeout wrapper.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HangingGateway;

    impl PaymentGateway for HangingGateway {
        async fn create_subscription(
            &self,
            _request: CreateSubscriptionRequest,
        ) -> Result<GatewaySubscription, GatewayFailure> {
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::{HangingGateway, MockPaymentGateway};
    use super::*;

    fn request() -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            token: "tok_visa".to_string(),
            plan_id: "clinic_monthly".to_string(),
            amount_cents: 4_900,
            currency: "usd".to_string(),
            billing_email: "owner@clinic.test".to_string(),
            idempotency_key: "key_1".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn mock_passes_idempotency_key_through() {
        let gateway = MockPaymentGateway::succeeding("prov_sub_1");
        gateway.create_subscription(request()).await.unwrap();

        let seen = gateway.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].idempotency_key, "key_1");
    }

    #[tokio::test]
    async fn timeout_maps_to_unavailable() {
        let gateway = TimeoutGateway::new(HangingGateway, Duration::from_millis(10));
        let result = gateway.create_subscription(request()).await;
        assert_eq!(result, Err(GatewayFailure::GatewayUnavailable));
    }

    #[tokio::test]
    async fn timeout_passes_fast_responses_through() {
        let gateway = TimeoutGateway::new(
            MockPaymentGateway::succeeding("prov_sub_1"),
            Duration::from_secs(5),
        );
        let sub = gateway.create_subscription(request()).await.unwrap();
        assert_eq!(sub.provider_subscription_id, "prov_sub_1");
    }
}
