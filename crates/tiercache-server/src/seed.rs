//! Critical seed loaded from a JSON file.
//!
//! The file holds an array of entries in the same shape the Wrapper's
//! `/tenants/{tenant}/critical` endpoint returns:
//!
//! ```json
//! [
//!   {"tenant_id": "acme", "namespace": "credit-cost", "identifier": "crm.leads.create",
//!    "value": {"type": "number", "value": 3.0}, "version": 1}
//! ]
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use tiercache_core::{CacheError, CriticalEntry, TenantId};
use tiercache_upstream::SeedSource;

pub struct FileSeedSource {
    path: PathBuf,
}

impl FileSeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SeedSource for FileSeedSource {
    async fn load(&self, tenants: &[TenantId]) -> Result<Vec<CriticalEntry>, CacheError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            CacheError::configuration(format!(
                "failed to read seed file {}: {e}",
                self.path.display()
            ))
        })?;
        let entries: Vec<CriticalEntry> = serde_json::from_slice(&raw).map_err(|e| {
            CacheError::configuration(format!(
                "invalid seed file {}: {e}",
                self.path.display()
            ))
        })?;

        let total = entries.len();
        let selected: Vec<_> = entries
            .into_iter()
            .filter(|e| tenants.iter().any(|t| e.key.belongs_to(t)))
            .collect();
        tracing::info!(
            path = %self.path.display(),
            total,
            selected = selected.len(),
            "loaded critical seed file"
        );
        Ok(selected)
    }
}
