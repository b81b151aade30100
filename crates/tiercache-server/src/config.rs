use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiercache_core::{Namespace, TenantId, Tier};
use tiercache_upstream::{CircuitBreakerConfig, RetryPolicy, UpstreamConfig};
use url::Url;

use crate::cache::{MAX_TTL, RoutingTable, TtlPolicy};
use crate::pubsub::BackoffPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Load(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Static namespace -> tier routing table
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Reference tier TTLs and fetch deadline
    #[serde(default)]
    pub reference: ReferenceConfig,
    /// Wrapper client settings
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// Per-tenant invalidation subscriptions
    #[serde(default)]
    pub subscriber: SubscriberConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    /// Startup bulk load of critical entries
    #[serde(default)]
    pub seed: SeedConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return invalid(format!("logging.level must be one of {valid_levels:?}"));
        }

        if let Some(ns) = self
            .routing
            .critical
            .iter()
            .find(|ns| self.routing.reference.contains(ns))
        {
            return invalid(format!(
                "namespace '{ns}' is routed to both the critical and reference tiers"
            ));
        }

        let max_ttl = MAX_TTL.as_secs();
        if !(1..=max_ttl).contains(&self.reference.default_ttl_secs) {
            return invalid(format!(
                "reference.default_ttl_secs must be between 1 and {max_ttl}"
            ));
        }
        if let Some((ns, _)) = self
            .reference
            .namespace_ttl_secs
            .iter()
            .find(|(_, ttl)| !(1..=max_ttl).contains(*ttl))
        {
            return invalid(format!(
                "reference.namespace_ttl_secs.{ns} must be between 1 and {max_ttl}"
            ));
        }
        if self.reference.fetch_timeout_ms == 0 {
            return invalid("reference.fetch_timeout_ms must be > 0".into());
        }
        if self.reference.cleanup_interval_secs == 0 {
            return invalid("reference.cleanup_interval_secs must be > 0".into());
        }

        if Url::parse(&self.upstream.base_url).is_err() {
            return invalid(format!(
                "upstream.base_url '{}' is not a valid URL",
                self.upstream.base_url
            ));
        }
        if self.upstream.request_timeout_ms == 0 {
            return invalid("upstream.request_timeout_ms must be > 0".into());
        }
        let cb = &self.upstream.circuit_breaker;
        if cb.enabled && (cb.failure_threshold == 0 || cb.half_open_success_threshold == 0) {
            return invalid("upstream.circuit_breaker thresholds must be > 0".into());
        }

        if !self.subscriber.channel_template.contains("{tenant_id}") {
            return invalid("subscriber.channel_template must contain '{tenant_id}'".into());
        }
        if self.subscriber.initial_backoff_ms == 0 {
            return invalid("subscriber.initial_backoff_ms must be > 0".into());
        }

        if self.seed.source == SeedSourceKind::File
            && self.seed.path.as_deref().unwrap_or("").is_empty()
        {
            return invalid("seed.source = \"file\" requires seed.path".into());
        }
        Ok(())
    }

    pub fn routing_table(&self) -> RoutingTable {
        let mut table = RoutingTable::empty();
        for ns in &self.routing.critical {
            table = table.with_route(ns.as_str(), Tier::Critical);
        }
        for ns in &self.routing.reference {
            table = table.with_route(ns.as_str(), Tier::Reference);
        }
        table
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.reference.namespace_ttl_secs.iter().fold(
            TtlPolicy::new(Duration::from_secs(self.reference.default_ttl_secs)),
            |policy, (ns, secs)| {
                policy.with_namespace_ttl(Namespace::new(ns.as_str()), Duration::from_secs(*secs))
            },
        )
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.reference.fetch_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.reference.cleanup_interval_secs)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.subscriber
            .tenants
            .iter()
            .map(|t| TenantId::new(t.as_str()))
            .collect()
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.subscriber.initial_backoff_ms),
            max: Duration::from_secs(self.subscriber.max_backoff_secs.max(1)),
        }
    }

    pub fn upstream_config(&self) -> Result<UpstreamConfig, ConfigError> {
        let base_url = Url::parse(&self.upstream.base_url)
            .map_err(|e| ConfigError::Invalid(format!("upstream.base_url: {e}")))?;
        let retry = RetryPolicy::default()
            .with_max_retries(self.upstream.max_retries)
            .with_base_backoff(Duration::from_millis(self.upstream.retry_backoff_ms));
        let cb = &self.upstream.circuit_breaker;
        let breaker = cb.enabled.then(|| {
            CircuitBreakerConfig::new()
                .with_failure_threshold(cb.failure_threshold)
                .with_recovery_timeout(Duration::from_secs(cb.recovery_timeout_secs))
                .with_half_open_success_threshold(cb.half_open_success_threshold)
        });

        Ok(UpstreamConfig::new(base_url)
            .with_request_timeout(Duration::from_millis(self.upstream.request_timeout_ms))
            .with_retry(retry)
            .with_circuit_breaker(breaker))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_critical_namespaces")]
    pub critical: Vec<String>,
    #[serde(default = "default_reference_namespaces")]
    pub reference: Vec<String>,
}

fn default_critical_namespaces() -> Vec<String> {
    [
        Namespace::CREDIT_COST,
        Namespace::ROLE_PERMISSIONS,
        Namespace::USER_STATUS,
        Namespace::FEATURE_CONFIG,
    ]
    .map(String::from)
    .to_vec()
}

fn default_reference_namespaces() -> Vec<String> {
    [Namespace::USER_PROFILE, Namespace::HIERARCHY, Namespace::AUDIT]
        .map(String::from)
        .to_vec()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            critical: default_critical_namespaces(),
            reference: default_reference_namespaces(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// TTL for namespaces without an override (default: 3 minutes)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Per-namespace TTL overrides, e.g. `audit = 60`
    #[serde(default)]
    pub namespace_ttl_secs: HashMap<String, u64>,

    /// Deadline for one upstream fetch, retries included
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// How often expired entries are swept
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    180
}
fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            namespace_ttl_secs: HashMap::new(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_upstream_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

fn default_upstream_url() -> String {
    "http://localhost:8081".into()
}
fn default_request_timeout_ms() -> u64 {
    2_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,
}

fn default_true() -> bool {
    true
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    30
}
fn default_half_open_success_threshold() -> u32 {
    1
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_success_threshold: default_half_open_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Tenants whose change channels this process follows
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default = "default_channel_template")]
    pub channel_template: String,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_channel_template() -> String {
    "tenant:{tenant_id}:changes".into()
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_secs() -> u64 {
    60
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            tenants: Vec::new(),
            channel_template: default_channel_template(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

/// Redis pub/sub transport. Without it the in-process transport is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeedSourceKind {
    /// `GET {upstream.base_url}/tenants/{tenant}/critical`
    #[default]
    Wrapper,
    /// JSON array of critical entries on disk
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeedConfig {
    #[serde(default)]
    pub source: SeedSourceKind,
    #[serde(default)]
    pub path: Option<String>,
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "tiercache.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g. TIERCACHE__REDIS__ENABLED=true
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("subscriber.tenants")
                .with_list_parse_key("routing.critical")
                .with_list_parse_key("routing.reference"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.reference.default_ttl_secs, 180);
        assert_eq!(cfg.subscriber.channel_template, "tenant:{tenant_id}:changes");
    }

    #[test]
    fn test_rejects_namespace_in_both_tiers() {
        let mut cfg = AppConfig::default();
        cfg.routing.reference.push(Namespace::CREDIT_COST.to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("credit-cost"));
    }

    #[test]
    fn test_rejects_ttl_beyond_bound() {
        let mut cfg = AppConfig::default();
        cfg.reference.default_ttl_secs = u64::MAX;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.reference
            .namespace_ttl_secs
            .insert(Namespace::AUDIT.to_string(), MAX_TTL.as_secs() + 1);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("audit"));
    }

    #[test]
    fn test_rejects_file_seed_without_path() {
        let mut cfg = AppConfig::default();
        cfg.seed.source = SeedSourceKind::File;
        assert!(cfg.validate().is_err());
        cfg.seed.path = Some("seed.json".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_ttl_policy_overrides() {
        let mut cfg = AppConfig::default();
        cfg.reference
            .namespace_ttl_secs
            .insert(Namespace::AUDIT.to_string(), 30);
        let policy = cfg.ttl_policy();
        assert_eq!(
            policy.ttl_for(&Namespace::new(Namespace::AUDIT)),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.ttl_for(&Namespace::new(Namespace::USER_PROFILE)),
            Duration::from_secs(180)
        );
    }

    #[test]
    fn test_routing_table_from_config() {
        let table = AppConfig::default().routing_table();
        assert_eq!(
            table.tier_of(&Namespace::new(Namespace::ROLE_PERMISSIONS)),
            Some(Tier::Critical)
        );
        assert_eq!(
            table.tier_of(&Namespace::new(Namespace::HIERARCHY)),
            Some(Tier::Reference)
        );
        assert_eq!(table.tier_of(&Namespace::new("unknown")), None);
    }

    #[test]
    fn test_upstream_config_mapping() {
        let mut cfg = AppConfig::default();
        cfg.upstream.circuit_breaker.enabled = false;
        cfg.upstream.max_retries = 4;
        let upstream = cfg.upstream_config().unwrap();
        assert!(upstream.circuit_breaker.is_none());
        assert_eq!(upstream.retry.max_retries, 4);
        assert_eq!(upstream.request_timeout, Duration::from_secs(2));
    }
}
