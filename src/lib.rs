//! Entitle - tenant entitlement and lifecycle engine
//!
//! Entitle tracks where each tenant of a multi-tenant SaaS product sits
//! in its subscription lifecycle (trial, active, past due, archived),
//! answers "may this tenant use the product right now", and drives the
//! transitions between those states from payments, webhooks, admin
//! overrides, and retention sweeps. Every transition is idempotent and
//! audited.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use entitle::{EngineConfig, EntitlementEngine, PlanCatalog};
//! # use entitle::store::test::InMemoryTenantStore;
//! # use entitle::gateway::test::MockPaymentGateway;
//! # use entitle::audit::test::MemoryAuditSink;
//!
//! #[tokio::main]
//! async fn main() -> entitle::Result<()> {
//!     entitle::init_tracing();
//!
//!     let config = EngineConfig::from_env()?;
//!     let plans = PlanCatalog::builder()
//!         .plan("starter")
//!         .amount_cents(2_900)
//!         .currency("usd")
//!         .period_days(30)
//!         .done()
//!         .build();
//!
//!     let engine = EntitlementEngine::new(
//!         InMemoryTenantStore::new(),
//!         MockPaymentGateway::succeeding("sub_demo"),
//!         MemoryAuditSink::new(),
//!         plans,
//!         config,
//!     );
//!
//!     engine.provision_tenant("acme").await?;
//!     let decision = engine.check_entitlement("acme", "/projects").await?;
//!     assert!(decision.allowed);
//!     Ok(())
//! }
//! ```

#![allow(async_fn_in_trait)] // gateway/audit traits are consumed generically, bounds stay local

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gate;
pub mod gateway;
pub mod machine;
pub mod plans;
pub mod store;
pub mod sweeper;
pub mod tenant;
pub mod webhook;

pub use audit::{Actor, AuditOutcome, AuditRecord, AuditSink, TracingAuditSink};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::EntitlementEngine;
pub use error::{EngineError, Result};
pub use executor::{
    ExecutionResult, PaymentOutcome, PaymentRequest, TransitionCommand, TransitionExecutor,
};
pub use gate::{DecisionReason, EntitlementDecision, EntitlementGate};
pub use gateway::{
    CreateSubscriptionRequest, GatewayFailure, GatewaySubscription, PaymentGateway, TimeoutGateway,
};
pub use machine::{NextState, Rejection, StateMachine, TransitionEvent};
pub use plans::{Plan, PlanCatalog};
pub use store::TenantStore;
pub use sweeper::{RetentionSweeper, SweepScheduler, SweepSummary};
pub use tenant::{TenantStatus, TenantSubscription};
pub use webhook::{WebhookEvent, WebhookOutcome, WebhookVerifier};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call this once early in `main()`. Respects `RUST_LOG` for filtering
/// and `ENTITLE_LOG_JSON=true` for JSON output.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("ENTITLE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
