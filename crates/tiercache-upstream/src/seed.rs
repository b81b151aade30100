//! One-time bulk load of critical entries at process startup.

use async_trait::async_trait;
use tiercache_core::{CacheError, CriticalEntry, TenantId};
use url::Url;

use crate::client::tenant_url;

/// Source of the initial critical entries and their versions.
#[async_trait]
pub trait SeedSource: Send + Sync {
    async fn load(&self, tenants: &[TenantId]) -> Result<Vec<CriticalEntry>, CacheError>;
}

/// Loads each tenant's critical entries from `GET {base}/tenants/{tenant}/critical`.
pub struct WrapperSeedSource {
    http_client: reqwest::Client,
    base_url: Url,
}

impl WrapperSeedSource {
    pub fn new(http_client: reqwest::Client, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    async fn load_tenant(&self, tenant: &TenantId) -> Result<Vec<CriticalEntry>, CacheError> {
        let url = tenant_url(&self.base_url, tenant.as_str(), &["critical"])?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::upstream(format!("seed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::upstream_status(status.as_u16(), body));
        }

        let entries: Vec<CriticalEntry> = response
            .json()
            .await
            .map_err(|e| CacheError::upstream(format!("invalid seed body: {e}")))?;

        // A tenant's seed must never provision another tenant's keys.
        let (own, foreign): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.key.belongs_to(tenant));
        if !foreign.is_empty() {
            tracing::warn!(
                tenant = %tenant,
                dropped = foreign.len(),
                "seed response contained entries for other tenants"
            );
        }
        Ok(own)
    }
}

#[async_trait]
impl SeedSource for WrapperSeedSource {
    async fn load(&self, tenants: &[TenantId]) -> Result<Vec<CriticalEntry>, CacheError> {
        let mut all = Vec::new();
        for tenant in tenants {
            let entries = self.load_tenant(tenant).await?;
            tracing::info!(tenant = %tenant, entries = entries.len(), "loaded critical seed");
            all.extend(entries);
        }
        Ok(all)
    }
}

/// Fixed, in-process seed. Useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSeedSource {
    entries: Vec<CriticalEntry>,
}

impl StaticSeedSource {
    pub fn new(entries: Vec<CriticalEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl SeedSource for StaticSeedSource {
    async fn load(&self, tenants: &[TenantId]) -> Result<Vec<CriticalEntry>, CacheError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| tenants.iter().any(|t| e.key.belongs_to(t)))
            .cloned()
            .collect())
    }
}
