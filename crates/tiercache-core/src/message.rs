//! Change notifications carried on the per-tenant pub/sub channel.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CacheError;
use crate::key::{CacheKey, Namespace, TenantId};
use crate::value::CriticalValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationKind {
    /// Replace a critical value (reference entries are evicted instead).
    Update,
    /// Evict the entry so the next lookup refetches.
    Invalidate,
}

/// Serialized body of a message on `tenant:{tenant_id}:changes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub tenant_id: TenantId,
    pub namespace: Namespace,
    pub identifier: String,
    pub kind: InvalidationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<CriticalValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub emitted_at: OffsetDateTime,
}

impl InvalidationMessage {
    /// Build an update carrying a new critical value.
    pub fn update(key: &CacheKey, value: CriticalValue, version: u64) -> Self {
        Self {
            tenant_id: key.tenant_id().clone(),
            namespace: key.namespace().clone(),
            identifier: key.identifier().to_string(),
            kind: InvalidationKind::Update,
            new_value: Some(value),
            version: Some(version),
            emitted_at: OffsetDateTime::now_utc(),
        }
    }

    /// Build a plain eviction.
    pub fn invalidate(key: &CacheKey) -> Self {
        Self {
            tenant_id: key.tenant_id().clone(),
            namespace: key.namespace().clone(),
            identifier: key.identifier().to_string(),
            kind: InvalidationKind::Invalidate,
            new_value: None,
            version: None,
            emitted_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(
            self.tenant_id.clone(),
            self.namespace.clone(),
            self.identifier.clone(),
        )
    }

    /// Decode a raw pub/sub payload.
    ///
    /// Fails with [`CacheError::InvalidMessage`] on malformed JSON or empty
    /// key components.
    pub fn parse(raw: &[u8]) -> Result<Self, CacheError> {
        let message: Self = serde_json::from_slice(raw)
            .map_err(|e| CacheError::invalid_message(format!("malformed payload: {e}")))?;

        if message.tenant_id.as_str().is_empty() {
            return Err(CacheError::invalid_message("tenant_id must not be empty"));
        }
        if message.namespace.as_str().is_empty() {
            return Err(CacheError::invalid_message("namespace must not be empty"));
        }
        if message.identifier.is_empty() {
            return Err(CacheError::invalid_message("identifier must not be empty"));
        }
        Ok(message)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
