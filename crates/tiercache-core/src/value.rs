use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Authorization/billing value held by the critical tier.
///
/// Serialized as `{"type": "number", "value": 3.0}` and friends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CriticalValue {
    /// Operation credit cost.
    Number(f64),
    /// Role permission set.
    StringSet(BTreeSet<String>),
    /// Account status.
    Enum(String),
    /// Arbitrary feature configuration.
    Blob(serde_json::Value),
}

impl CriticalValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::StringSet(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::StringSet(_) => "string_set",
            Self::Enum(_) => "enum",
            Self::Blob(_) => "blob",
        }
    }
}

/// A versioned critical value. Also the unit of the startup bulk load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalEntry {
    #[serde(flatten)]
    pub key: CacheKey,
    pub value: CriticalValue,
    pub version: u64,
}

impl CriticalEntry {
    pub fn new(key: CacheKey, value: CriticalValue, version: u64) -> Self {
        Self {
            key,
            value,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Namespace;
    use serde_json::json;

    #[test]
    fn test_tagged_representation() {
        let value = CriticalValue::Number(3.0);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"type": "number", "value": 3.0})
        );

        let perms: CriticalValue = serde_json::from_value(json!({
            "type": "string_set",
            "value": ["leads:read", "leads:write"]
        }))
        .unwrap();
        assert!(perms.as_string_set().unwrap().contains("leads:write"));
        assert_eq!(perms.kind(), "string_set");
    }

    #[test]
    fn test_entry_flattens_key() {
        let entry: CriticalEntry = serde_json::from_value(json!({
            "tenant_id": "tenant-1",
            "namespace": "user-status",
            "identifier": "user-1",
            "value": {"type": "enum", "value": "active"},
            "version": 7
        }))
        .unwrap();

        assert_eq!(entry.key, CacheKey::new("tenant-1", Namespace::USER_STATUS, "user-1"));
        assert_eq!(entry.value.as_enum(), Some("active"));
        assert_eq!(entry.version, 7);
    }
}
