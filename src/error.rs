//! Engine error taxonomy.
//!
//! Every failure mode the engine can surface maps onto one of these
//! variants. The engine never downgrades a failure to success: a rejected
//! or failed transition still produces an audit record before the error
//! propagates to the caller.

use crate::gateway::GatewayFailure;

/// The main error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input rejected before any side effect (unknown plan id,
    /// malformed request, transition not permitted from the current state).
    #[error("validation error: {0}")]
    Validation(String),

    /// No tenant record exists for the given id.
    #[error("tenant not found: {0}")]
    NotFound(String),

    /// Missing or invalid admin secret, or the caller may not act on the
    /// tenant. Deliberately generic so it leaks nothing about whether the
    /// tenant exists.
    #[error("unauthorized")]
    Unauthorized,

    /// The payment processor rejected or could not service the request.
    /// No store mutation has occurred; safe to retry with the same
    /// idempotency key.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayFailure),

    /// A concurrent writer won the conditional write. The operation was
    /// retried once internally before this surfaced; the caller should
    /// re-read and re-decide.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The durable store is unavailable or returned an error. Never
    /// assumed to have partially succeeded.
    #[error("storage error: {0}")]
    Storage(String),

    /// The audit sink rejected an append. Audit writes are part of the
    /// engine's contract, so this is a hard failure, not best-effort.
    #[error("audit error: {0}")]
    Audit(String),
}

impl EngineError {
    /// Whether the caller may safely retry the same operation with the
    /// same idempotency key.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict(_) | Self::Storage(_) | Self::Audit(_) => true,
            Self::Gateway(failure) => failure.is_retryable(),
            Self::Validation(_) | Self::NotFound(_) | Self::Unauthorized => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
