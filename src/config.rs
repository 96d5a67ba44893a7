//! Engine configuration.
//!
//! All knobs have production defaults and can be overridden either through
//! the builder or from `ENTITLE_*` environment variables via
//! [`EngineConfig::from_env`]. Secrets are wrapped in
//! [`secrecy::SecretString`] so they never appear in debug output.

use std::env;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{EngineError, Result};

/// Default trial length granted to newly provisioned tenants.
pub const DEFAULT_TRIAL_DAYS: u32 = 14;
/// Default retention window for archived tenants before purge eligibility.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;
/// Default path prefixes that stay reachable for expired tenants.
pub const DEFAULT_BILLING_PATHS: &[&str] = &["/billing"];
/// Default upper bound on a single payment gateway call.
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
/// Default acceptance window for webhook signature timestamps.
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
/// Default interval between retention sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// Runtime configuration for the entitlement engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Trial length in days for new tenants.
    pub trial_days: u32,
    /// Days an archived tenant is retained before it may be purged.
    pub retention_days: u32,
    /// Path prefixes that remain reachable when entitlement is denied.
    pub billing_paths: Vec<String>,
    /// Timeout applied to each payment gateway call.
    pub gateway_timeout: Duration,
    /// Maximum signature timestamp skew accepted for webhooks.
    pub webhook_tolerance_secs: u64,
    /// Interval between scheduled retention sweeps.
    pub sweep_interval: Duration,
    /// Shared secret authorizing admin override and sweep operations.
    pub admin_secret: SecretString,
    /// Shared secret used to verify webhook signatures.
    pub webhook_secret: SecretString,
}

impl EngineConfig {
    /// Starts a builder with production defaults and the given secrets.
    pub fn builder(
        admin_secret: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self {
                trial_days: DEFAULT_TRIAL_DAYS,
                retention_days: DEFAULT_RETENTION_DAYS,
                billing_paths: DEFAULT_BILLING_PATHS.iter().map(|p| p.to_string()).collect(),
                gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
                webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
                sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
                admin_secret: SecretString::from(admin_secret.into()),
                webhook_secret: SecretString::from(webhook_secret.into()),
            },
        }
    }

    /// Loads configuration from `ENTITLE_*` environment variables.
    ///
    /// `ENTITLE_ADMIN_SECRET` and `ENTITLE_WEBHOOK_SECRET` are required.
    /// Everything else falls back to the defaults above:
    ///
    /// - `ENTITLE_TRIAL_DAYS`
    /// - `ENTITLE_RETENTION_DAYS`
    /// - `ENTITLE_BILLING_PATHS` (comma separated prefixes)
    /// - `ENTITLE_GATEWAY_TIMEOUT_SECS`
    /// - `ENTITLE_WEBHOOK_TOLERANCE_SECS`
    /// - `ENTITLE_SWEEP_INTERVAL_SECS`
    pub fn from_env() -> Result<Self> {
        let admin_secret = require_env("ENTITLE_ADMIN_SECRET")?;
        let webhook_secret = require_env("ENTITLE_WEBHOOK_SECRET")?;

        let mut builder = Self::builder(admin_secret, webhook_secret);
        if let Some(days) = parse_env::<u32>("ENTITLE_TRIAL_DAYS")? {
            builder = builder.trial_days(days);
        }
        if let Some(days) = parse_env::<u32>("ENTITLE_RETENTION_DAYS")? {
            builder = builder.retention_days(days);
        }
        if let Ok(paths) = env::var("ENTITLE_BILLING_PATHS") {
            let paths: Vec<String> = paths
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            builder = builder.billing_paths(paths);
        }
        if let Some(secs) = parse_env::<u64>("ENTITLE_GATEWAY_TIMEOUT_SECS")? {
            builder = builder.gateway_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_env::<u64>("ENTITLE_WEBHOOK_TOLERANCE_SECS")? {
            builder = builder.webhook_tolerance_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("ENTITLE_SWEEP_INTERVAL_SECS")? {
            builder = builder.sweep_interval(Duration::from_secs(secs));
        }
        builder.build()
    }

    /// Retention window in seconds, derived from [`Self::retention_days`].
    pub fn retention_window_secs(&self) -> u64 {
        u64::from(self.retention_days) * crate::tenant::DAY_SECS
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn trial_days(mut self, days: u32) -> Self {
        self.config.trial_days = days;
        self
    }

    #[must_use]
    pub fn retention_days(mut self, days: u32) -> Self {
        self.config.retention_days = days;
        self
    }

    #[must_use]
    pub fn billing_paths(mut self, paths: Vec<String>) -> Self {
        self.config.billing_paths = paths;
        self
    }

    #[must_use]
    pub fn gateway_timeout(mut self, timeout: Duration) -> Self {
        self.config.gateway_timeout = timeout;
        self
    }

    #[must_use]
    pub fn webhook_tolerance_secs(mut self, secs: u64) -> Self {
        self.config.webhook_tolerance_secs = secs;
        self
    }

    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<EngineConfig> {
        if self.config.trial_days == 0 {
            return Err(EngineError::Validation(
                "trial_days must be at least 1".into(),
            ));
        }
        if self.config.retention_days == 0 {
            return Err(EngineError::Validation(
                "retention_days must be at least 1".into(),
            ));
        }
        if self.config.gateway_timeout.is_zero() {
            return Err(EngineError::Validation(
                "gateway_timeout must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| EngineError::Validation(format!("{name} must be set")))
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::Validation(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        match EngineConfig::builder("admin", "whsec").build() {
            Ok(config) => config,
            Err(err) => panic!("default config should build: {err}"),
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = config();
        assert_eq!(config.trial_days, 14);
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.billing_paths, vec!["/billing".to_string()]);
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert_eq!(config.webhook_tolerance_secs, 300);
        assert_eq!(config.sweep_interval, Duration::from_secs(21_600));
    }

    #[test]
    fn retention_window_converts_days_to_seconds() {
        let config = config();
        assert_eq!(config.retention_window_secs(), 90 * 86_400);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = EngineConfig::builder("admin", "whsec")
            .trial_days(30)
            .retention_days(7)
            .billing_paths(vec!["/pay".into(), "/billing".into()])
            .gateway_timeout(Duration::from_secs(3))
            .build();
        let config = match config {
            Ok(config) => config,
            Err(err) => panic!("override config should build: {err}"),
        };
        assert_eq!(config.trial_days, 30);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.billing_paths.len(), 2);
        assert_eq!(config.gateway_timeout, Duration::from_secs(3));
    }

    #[test]
    fn zero_trial_days_is_rejected() {
        let err = EngineConfig::builder("admin", "whsec")
            .trial_days(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let err = EngineConfig::builder("admin", "whsec")
            .retention_days(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
