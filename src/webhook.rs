//! Payment gateway webhook intake.
//!
//! Verifies webhook signatures, parses events, and maps them onto
//! transition commands. The provider's event id is the idempotency key,
//! so a redelivered webhook replays instead of re-applying.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::audit::Actor;
use crate::error::{EngineError, Result};
use crate::executor::TransitionCommand;
use crate::machine::TransitionEvent;
use crate::tenant::unix_now;

/// Parsed webhook event from the payment gateway.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEvent {
    /// Provider event id; doubles as the idempotency key.
    pub id: String,
    /// Event type (e.g. "subscription.charge_succeeded").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: WebhookEventData,
    /// When the provider created the event, Unix seconds.
    pub created: u64,
}

/// Webhook event payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event applied a transition.
    Processed,
    /// Event was valid but the state machine rejected the transition.
    Rejected,
    /// Event type is not relevant to the lifecycle.
    Ignored,
    /// Event was already applied under the same id (redelivery).
    AlreadyProcessed,
}

/// Verifies webhook signatures and maps events to commands.
///
/// The signing secret is held in a [`SecretString`] so it cannot leak
/// through debug output.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    /// Create a verifier with the given signing secret and timestamp
    /// tolerance.
    #[must_use]
    pub fn new(secret: impl Into<SecretString>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify the signature header and parse the event.
    ///
    /// # Arguments
    /// * `payload` - the raw request body
    /// * `signature` - the signature header, `t=<ts>,v1=<hex hmac>`
    ///
    /// # Errors
    /// Returns a validation error on signature mismatch, stale
    /// timestamp, or malformed payload. The error messages stay generic
    /// so callers cannot use them as an oracle.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        let parts = parse_signature_header(signature)?;

        let now = unix_now() as i64;
        if (now - parts.timestamp).abs() > self.tolerance_secs {
            return Err(EngineError::Validation(
                "webhook timestamp outside tolerance".to_string(),
            ));
        }

        let signed_payload = format!("{}.{}", parts.timestamp, String::from_utf8_lossy(payload));
        let expected =
            compute_signature(self.secret.expose_secret(), signed_payload.as_bytes())?;
        let expected_bytes = hex::decode(&expected)
            .map_err(|_| EngineError::Validation("invalid signature".to_string()))?;
        let provided_bytes = hex::decode(&parts.signature)
            .map_err(|_| EngineError::Validation("invalid signature".to_string()))?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(EngineError::Validation("invalid signature".to_string()));
        }

        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "entitle::webhook",
                error = %e,
                "Failed to parse webhook payload"
            );
            EngineError::Validation("malformed webhook payload".to_string())
        })
    }

    /// Map a verified event to a transition command.
    ///
    /// Returns `Ok(None)` for event types the lifecycle does not care
    /// about.
    pub fn to_command(&self, event: &WebhookEvent) -> Result<Option<TransitionCommand>> {
        // Unknown event types are acknowledged without inspecting the
        // payload, which may not even carry a tenant id.
        if !matches!(
            event.event_type.as_str(),
            "subscription.charge_succeeded" | "subscription.charge_failed"
        ) {
            return Ok(None);
        }

        let object = event.data.object.as_object().ok_or_else(|| {
            EngineError::Validation("malformed webhook payload".to_string())
        })?;

        let tenant_id = object
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Validation("webhook missing tenant_id".to_string()))?
            .to_string();

        let transition = match event.event_type.as_str() {
            "subscription.charge_succeeded" => {
                let provider_subscription_id = object
                    .get("subscription_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        EngineError::Validation("webhook missing subscription_id".to_string())
                    })?
                    .to_string();
                let plan_id = object
                    .get("plan_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let next_billing_date = object.get("next_billing_date").and_then(|v| v.as_u64());
                TransitionEvent::PaymentConfirmed {
                    plan_id,
                    provider_subscription_id,
                    next_billing_date,
                }
            }
            "subscription.charge_failed" => TransitionEvent::PaymentFailed,
            _ => return Ok(None),
        };

        Ok(Some(TransitionCommand {
            tenant_id,
            event: transition,
            idempotency_key: event.id.clone(),
            actor: Actor::Webhook,
        }))
    }
}

/// Parsed signature header parts.
struct SignatureParts {
    timestamp: i64,
    signature: String,
}

/// Parse the `t=<ts>,v1=<sig>` signature header.
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            EngineError::Validation("invalid signature header".to_string())
        })?;
        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {} // ignore other versions
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp
            .ok_or_else(|| EngineError::Validation("invalid signature header".to_string()))?,
        signature: signature
            .ok_or_else(|| EngineError::Validation("invalid signature header".to_string()))?,
    })
}

/// Compute the hex HMAC-SHA256 of `payload`.
pub(crate) fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EngineError::Validation("invalid webhook secret".to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signature header for a payload (test and fixture helper).
#[cfg(any(test, feature = "test-support"))]
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let sig = compute_signature(secret, signed.as_bytes()).unwrap_or_default();
    format!("t={timestamp},v1={sig}")
}
