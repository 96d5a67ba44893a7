//! Tenant record store.
//!
//! Implement this trait to persist tenant subscription records to your
//! database. An in-memory implementation is provided for testing.

use async_trait::async_trait;

use crate::error::Result;
use crate::tenant::TenantSubscription;

/// Durable keyed storage for tenant subscription records.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Fetch the record for a tenant.
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSubscription>>;

    /// Insert a freshly provisioned record. Fails if one already exists.
    async fn insert(&self, record: &TenantSubscription) -> Result<()>;

    /// Write `record` only if the stored version equals `expected_version`.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` on version mismatch
    /// (a concurrent writer got there first). Implementations MUST make
    /// the compare-and-swap atomic; for SQL stores that is
    ///
    /// ```sql
    /// UPDATE tenant_subscriptions
    /// SET ..., version = version + 1
    /// WHERE tenant_id = $1 AND version = $2
    /// ```
    ///
    /// with success decided by the affected row count.
    async fn conditional_update(
        &self,
        tenant_id: &str,
        expected_version: u64,
        record: &TenantSubscription,
    ) -> Result<bool>;

    /// List archived tenants with `archived_at` strictly before `cutoff`.
    async fn list_archived_before(&self, cutoff: u64) -> Result<Vec<TenantSubscription>>;

    /// Irreversibly remove the tenant and cascade to all tenant-owned
    /// data. There is no undo.
    async fn purge(&self, tenant_id: &str) -> Result<()>;
}

/// In-memory tenant store for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::error::EngineError;
    use crate::tenant::TenantStatus;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory store. Wraps data in `Arc` for cheap cloning; the
    /// conditional update runs under a single write lock and so is
    /// genuinely atomic.
    #[derive(Clone, Default)]
    pub struct InMemoryTenantStore {
        inner: Arc<InMemoryInner>,
    }

    #[derive(Default)]
    struct InMemoryInner {
        records: RwLock<HashMap<String, TenantSubscription>>,
        purged: RwLock<Vec<String>>,
        fail_purges_for: RwLock<Vec<String>>,
    }

    impl InMemoryTenantStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a record, replacing any existing one (for testing).
        pub fn seed(&self, record: TenantSubscription) {
            self.inner
                .records
                .write()
                .unwrap()
                .insert(record.tenant_id.clone(), record);
        }

        /// Tenant ids purged so far.
        pub fn purged(&self) -> Vec<String> {
            self.inner.purged.read().unwrap().clone()
        }

        /// Make purge fail for the given tenant (for failure-isolation
        /// tests).
        pub fn fail_purge_for(&self, tenant_id: &str) {
            self.inner
                .fail_purges_for
                .write()
                .unwrap()
                .push(tenant_id.to_string());
        }
    }

    #[async_trait]
    impl TenantStore for InMemoryTenantStore {
        async fn get(&self, tenant_id: &str) -> Result<Option<TenantSubscription>> {
            Ok(self.inner.records.read().unwrap().get(tenant_id).cloned())
        }

        async fn insert(&self, record: &TenantSubscription) -> Result<()> {
            let mut records = self.inner.records.write().unwrap();
            if records.contains_key(&record.tenant_id) {
                return Err(EngineError::Conflict(format!(
                    "tenant already provisioned: {}",
                    record.tenant_id
                )));
            }
            records.insert(record.tenant_id.clone(), record.clone());
            Ok(())
        }

        async fn conditional_update(
            &self,
            tenant_id: &str,
            expected_version: u64,
            record: &TenantSubscription,
        ) -> Result<bool> {
            let mut records = self.inner.records.write().unwrap();
            match records.get(tenant_id) {
                Some(current) if current.version == expected_version => {
                    records.insert(tenant_id.to_string(), record.clone());
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Err(EngineError::NotFound(tenant_id.to_string())),
            }
        }

        async fn list_archived_before(&self, cutoff: u64) -> Result<Vec<TenantSubscription>> {
            Ok(self
                .inner
                .records
                .read()
                .unwrap()
                .values()
                .filter(|r| {
                    r.status == TenantStatus::Archived
                        && r.archived_at.is_some_and(|at| at < cutoff)
                })
                .cloned()
                .collect())
        }

        async fn purge(&self, tenant_id: &str) -> Result<()> {
            if self
                .inner
                .fail_purges_for
                .read()
                .unwrap()
                .iter()
                .any(|id| id == tenant_id)
            {
                return Err(EngineError::Storage(format!(
                    "purge failed for {tenant_id}"
                )));
            }
            let removed = self.inner.records.write().unwrap().remove(tenant_id);
            if removed.is_none() {
                return Err(EngineError::NotFound(tenant_id.to_string()));
            }
            self.inner.purged.write().unwrap().push(tenant_id.to_string());
            Ok(())
        }
    }
}
