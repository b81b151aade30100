//! Wires the stores, router, subscribers and sweeper together.
//!
//! Startup order: one subscriber per tenant is spawned first, then the
//! critical seed is loaded. Updates published while the seed loads are
//! applied under the version rule, so the seed can never roll them back.

use std::sync::Arc;
use std::time::Duration;

use tiercache_core::{CacheError, InvalidationMessage, TenantId};
use tiercache_upstream::{SeedSource, UpstreamClient};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cache::{CriticalStore, LookupRouter, ReferenceStore, RoutingTable, SeedReport, TtlPolicy};
use crate::config::AppConfig;
use crate::metrics;
use crate::pubsub::{
    BackoffPolicy, InvalidationSubscriber, InvalidationTransport, TransportError,
    publish_invalidation,
};

const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

pub struct CacheRuntimeBuilder {
    upstream: Arc<dyn UpstreamClient>,
    transport: Arc<dyn InvalidationTransport>,
    seed: Option<Arc<dyn SeedSource>>,
    routes: RoutingTable,
    ttl: TtlPolicy,
    fetch_timeout: Duration,
    tenants: Vec<TenantId>,
    channel_template: String,
    backoff: BackoffPolicy,
    cleanup_interval: Duration,
}

impl CacheRuntimeBuilder {
    pub fn new(upstream: Arc<dyn UpstreamClient>, transport: Arc<dyn InvalidationTransport>) -> Self {
        Self {
            upstream,
            transport,
            seed: None,
            routes: RoutingTable::default(),
            ttl: TtlPolicy::default(),
            fetch_timeout: Duration::from_secs(5),
            tenants: Vec::new(),
            channel_template: "tenant:{tenant_id}:changes".into(),
            backoff: BackoffPolicy::default(),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    /// Apply routing, TTL, subscriber and sweeper settings from config.
    pub fn with_config(self, config: &AppConfig) -> Self {
        Self {
            routes: config.routing_table(),
            ttl: config.ttl_policy(),
            fetch_timeout: config.fetch_timeout(),
            tenants: config.tenants(),
            channel_template: config.subscriber.channel_template.clone(),
            backoff: config.backoff_policy(),
            cleanup_interval: config.cleanup_interval().max(MIN_CLEANUP_INTERVAL),
            ..self
        }
    }

    pub fn with_seed_source(mut self, seed: Arc<dyn SeedSource>) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_routes(mut self, routes: RoutingTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_tenants(mut self, tenants: impl IntoIterator<Item = TenantId>) -> Self {
        self.tenants = tenants.into_iter().collect();
        self
    }

    pub fn with_channel_template(mut self, template: impl Into<String>) -> Self {
        self.channel_template = template.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sweep interval, floored at 1 ms.
    pub fn with_cleanup_interval(mut self, every: Duration) -> Self {
        self.cleanup_interval = every.max(MIN_CLEANUP_INTERVAL);
        self
    }

    pub fn build(self) -> CacheRuntime {
        let routes = Arc::new(self.routes);
        let critical = Arc::new(CriticalStore::new());
        let reference = ReferenceStore::new(self.upstream, self.ttl, self.fetch_timeout);
        let router = LookupRouter::new(Arc::clone(&routes), Arc::clone(&critical), reference.clone());
        let (shutdown_tx, _) = watch::channel(false);

        CacheRuntime {
            routes,
            critical,
            reference,
            router,
            transport: self.transport,
            seed: self.seed,
            tenants: self.tenants,
            channel_template: self.channel_template,
            backoff: self.backoff,
            cleanup_interval: self.cleanup_interval,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }
}

/// A running cache: both tiers, the router, and their background tasks.
pub struct CacheRuntime {
    routes: Arc<RoutingTable>,
    critical: Arc<CriticalStore>,
    reference: ReferenceStore,
    router: LookupRouter,
    transport: Arc<dyn InvalidationTransport>,
    seed: Option<Arc<dyn SeedSource>>,
    tenants: Vec<TenantId>,
    channel_template: String,
    backoff: BackoffPolicy,
    cleanup_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheRuntime {
    pub fn builder(
        upstream: Arc<dyn UpstreamClient>,
        transport: Arc<dyn InvalidationTransport>,
    ) -> CacheRuntimeBuilder {
        CacheRuntimeBuilder::new(upstream, transport)
    }

    /// Spawn subscribers and the sweeper, then load the critical seed.
    ///
    /// Critical lookups fail until this returns `Ok`. On a seed error the
    /// background tasks keep running; call [`shutdown`](Self::shutdown).
    pub async fn start(&mut self) -> Result<SeedReport, CacheError> {
        if !self.tasks.is_empty() {
            return Err(CacheError::configuration("cache runtime already started"));
        }

        for tenant in &self.tenants {
            let subscriber = InvalidationSubscriber::new(
                tenant.clone(),
                &self.channel_template,
                Arc::clone(&self.transport),
                Arc::clone(&self.routes),
                Arc::clone(&self.critical),
                self.reference.clone(),
            )
            .with_backoff(self.backoff);
            self.tasks.push(subscriber.spawn(self.shutdown_tx.subscribe()));
        }
        let sweeper = self.spawn_sweeper();
        self.tasks.push(sweeper);

        let entries = match &self.seed {
            Some(source) => source.load(&self.tenants).await?,
            None => {
                warn!("no seed source configured, critical store starts empty");
                Vec::new()
            }
        };
        let report = self.critical.seed(entries);

        info!(
            tenants = self.tenants.len(),
            seeded = report.applied,
            "cache runtime started"
        );
        Ok(report)
    }

    pub fn router(&self) -> &LookupRouter {
        &self.router
    }

    pub fn critical(&self) -> &Arc<CriticalStore> {
        &self.critical
    }

    pub fn reference(&self) -> &ReferenceStore {
        &self.reference
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Publish a message on its tenant's channel through this runtime's transport.
    pub async fn publish(&self, message: &InvalidationMessage) -> Result<(), TransportError> {
        publish_invalidation(self.transport.as_ref(), &self.channel_template, message).await
    }

    /// Signal every background task to stop and wait for them.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("cache runtime stopped");
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let reference = self.reference.clone();
        let critical = Arc::clone(&self.critical);
        let every = self.cleanup_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(interval_ms = every.as_millis() as u64, "reference sweeper started");
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {
                        reference.cleanup_expired();
                        metrics::set_cache_entries("critical", critical.len());
                    }
                }
            }
            debug!("reference sweeper stopped");
        })
    }
}
