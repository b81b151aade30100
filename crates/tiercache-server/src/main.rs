use std::{env, sync::Arc};

use anyhow::Context;
use tiercache_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use tiercache_server::config::{AppConfig, SeedSourceKind};
use tiercache_server::pubsub::{InMemoryTransport, InvalidationTransport, RedisTransport};
use tiercache_server::seed::FileSeedSource;
use tiercache_server::CacheRuntime;
use tiercache_upstream::{HttpUpstreamClient, SeedSource, WrapperSeedSource};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From TIERCACHE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (tiercache.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (TIERCACHE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    if env::args().any(|arg| arg == "--print-default-config") {
        match toml::to_string_pretty(&AppConfig::default()) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to render default config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = tiercache_server::observability::init_tracing(&cfg.logging) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(2);
    }
    tracing::info!(
        path = %config_path,
        source = %source,
        format = ?cfg.logging.format,
        "Configuration loaded"
    );
    tiercache_server::metrics::init_metrics();

    if let Err(err) = run(cfg).await {
        eprintln!("Cache runtime error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let upstream_config = cfg.upstream_config()?;
    let base_url = upstream_config.base_url.clone();
    let upstream = Arc::new(HttpUpstreamClient::new(upstream_config)?);

    let transport: Arc<dyn InvalidationTransport> = if cfg.redis.enabled {
        tracing::info!(url = %cfg.redis.url, "using Redis invalidation transport");
        Arc::new(RedisTransport::new(&cfg.redis.url)?)
    } else {
        tracing::warn!("Redis disabled, invalidations are only delivered in-process");
        Arc::new(InMemoryTransport::new())
    };

    let seed: Arc<dyn SeedSource> = match cfg.seed.source {
        SeedSourceKind::Wrapper => Arc::new(WrapperSeedSource::new(reqwest::Client::new(), base_url)),
        SeedSourceKind::File => {
            let path = cfg
                .seed
                .path
                .clone()
                .context("seed.path is required for file seeds")?;
            Arc::new(FileSeedSource::new(path))
        }
    };

    let mut runtime = CacheRuntime::builder(upstream, transport)
        .with_config(&cfg)
        .with_seed_source(seed)
        .build();

    if let Err(e) = runtime.start().await {
        runtime.shutdown().await;
        return Err(e).context("failed to start cache runtime");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    runtime.shutdown().await;
    Ok(())
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: TIERCACHE_CONFIG
/// 3. Default: tiercache.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("TIERCACHE_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
