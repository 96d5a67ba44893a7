//! Plan catalog.
//!
//! The engine's entitlement decision is binary, but payment submission
//! still needs to resolve a plan id to a charge amount and billing period,
//! and an unknown plan id must be rejected before any side effect.
//!
//! ```rust,ignore
//! use entitle::PlanCatalog;
//!
//! let plans = PlanCatalog::builder()
//!     .plan("clinic_monthly")
//!         .amount_cents(4_900)
//!         .currency("usd")
//!         .period_days(30)
//!         .done()
//!     .plan("clinic_yearly")
//!         .amount_cents(49_900)
//!         .period_days(365)
//!         .done()
//!     .build();
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A purchasable plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    /// Internal plan identifier.
    pub id: String,
    /// Recurring charge amount in minor units.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Billing period length in days.
    pub period_days: u32,
}

/// A collection of plan configurations.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a catalog.
    #[must_use]
    pub fn builder() -> PlanCatalogBuilder {
        PlanCatalogBuilder::default()
    }

    /// Get a plan by id.
    #[must_use]
    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Check if a plan exists.
    #[must_use]
    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.contains_key(plan_id)
    }

    /// Get the number of plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Check if there are no plans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Iterate over all plans.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Plan)> {
        self.plans.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Builder for [`PlanCatalog`].
#[derive(Debug, Default)]
pub struct PlanCatalogBuilder {
    plans: HashMap<String, Plan>,
}

impl PlanCatalogBuilder {
    /// Start defining a plan. Call `.done()` to return to the catalog
    /// builder.
    #[must_use]
    pub fn plan(self, id: impl Into<String>) -> PlanBuilder {
        PlanBuilder {
            catalog: self,
            plan: Plan {
                id: id.into(),
                amount_cents: 0,
                currency: "usd".to_string(),
                period_days: 30,
            },
        }
    }

    /// Finish and produce the catalog.
    #[must_use]
    pub fn build(self) -> PlanCatalog {
        PlanCatalog { plans: self.plans }
    }
}

/// Builder for a single plan within a [`PlanCatalogBuilder`] chain.
#[derive(Debug)]
pub struct PlanBuilder {
    catalog: PlanCatalogBuilder,
    plan: Plan,
}

impl PlanBuilder {
    /// Set the charge amount in minor units.
    #[must_use]
    pub fn amount_cents(mut self, amount: i64) -> Self {
        self.plan.amount_cents = amount;
        self
    }

    /// Set the currency code.
    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.plan.currency = currency.into();
        self
    }

    /// Set the billing period length in days.
    #[must_use]
    pub fn period_days(mut self, days: u32) -> Self {
        self.plan.period_days = days;
        self
    }

    /// Finish this plan and return to the catalog builder.
    #[must_use]
    pub fn done(mut self) -> PlanCatalogBuilder {
        self.catalog.plans.insert(self.plan.id.clone(), self.plan);
        self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_registers_plans() {
        let plans = PlanCatalog::builder()
            .plan("clinic_monthly")
                .amount_cents(4_900)
                .period_days(30)
                .done()
            .plan("clinic_yearly")
                .amount_cents(49_900)
                .currency("eur")
                .period_days(365)
                .done()
            .build();

        assert_eq!(plans.len(), 2);
        assert!(plans.contains("clinic_monthly"));

        let yearly = plans.get("clinic_yearly").unwrap();
        assert_eq!(yearly.amount_cents, 49_900);
        assert_eq!(yearly.currency, "eur");
        assert_eq!(yearly.period_days, 365);
    }

    #[test]
    fn unknown_plan_is_absent() {
        let plans = PlanCatalog::new();
        assert!(plans.is_empty());
        assert!(plans.get("nope").is_none());
    }
}
