//! skyfuse-fusion - Aircraft state fusion service
//!
//! Ingests position reports from feeders and polling providers, merges them
//! by source priority and serves the result to map clients.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use skyfuse_common::config::{load_or_default, resolve_config_path};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyfuse_fusion::config::{FusionConfig, CONFIG_FILE_NAME};
use skyfuse_fusion::db::{init_database_pool, SqliteSnapshotStore};
use skyfuse_fusion::distributed_cache::{
    CacheBackend, DistributedCache, MemoryCacheBackend, RedisCacheBackend,
};
use skyfuse_fusion::queue::{spawn_workers, MemoryQueue, QueueBackend, RedisListQueue};
use skyfuse_fusion::{build_router, AppState, Collaborators};

/// Command-line arguments for skyfuse-fusion
#[derive(Parser, Debug)]
#[command(name = "skyfuse-fusion")]
#[command(about = "Aircraft state fusion and serving service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "SKYFUSE_PORT")]
    port: Option<u16>,

    /// SQLite database path (overrides config)
    #[arg(short, long, env = "SKYFUSE_DATABASE")]
    database: Option<PathBuf>,

    /// Redis URL for the distributed cache and queue (overrides config)
    #[arg(long, env = "SKYFUSE_REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_FILE_NAME);
    let mut config: FusionConfig =
        load_or_default(config_path.as_deref()).context("Failed to load config")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(url) = args.redis_url {
        config.distributed_cache.url = Some(url.clone());
        config.queue.url = Some(url);
    }

    // RUST_LOG wins over the config file
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("skyfuse_fusion={0},skyfuse_common={0},tower_http=info", config.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting skyfuse-fusion v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.bind,
        config.server.port
    );

    let pool = init_database_pool(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    let store = Arc::new(SqliteSnapshotStore::new(pool));

    let cache = Arc::new(connect_cache(&config).await);
    let queue = connect_queue(&config).await;

    let state = AppState::new(
        &config,
        store,
        cache,
        queue.clone(),
        Collaborators::default(),
    );

    let cancel = CancellationToken::new();
    let mut background = Vec::new();
    background.push(state.pipeline.live().clone().spawn_sweeper(
        Duration::from_secs(config.live_store.sweep_interval_secs.max(1)),
        cancel.clone(),
    ));
    if let Some(queue) = queue {
        background.extend(spawn_workers(
            queue,
            state.pipeline.clone(),
            (&config.queue).into(),
            cancel.clone(),
        ));
    }

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Distributed cache per config; an unreachable Redis disables the cache
async fn connect_cache(config: &FusionConfig) -> DistributedCache {
    let settings = &config.distributed_cache;
    if !settings.enabled {
        info!("Distributed cache disabled");
        return DistributedCache::disabled();
    }

    let backend: Arc<dyn CacheBackend> = match settings.url.as_deref() {
        Some(url) => match RedisCacheBackend::connect(url).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!(error = %e, "Redis unreachable, running without distributed cache");
                return DistributedCache::disabled();
            }
        },
        None => {
            info!("No Redis URL, distributed cache is in-process only");
            Arc::new(MemoryCacheBackend::new())
        }
    };
    DistributedCache::new(backend, settings)
}

/// Queue backend per config; `None` selects direct ingest
async fn connect_queue(config: &FusionConfig) -> Option<Arc<dyn QueueBackend>> {
    let settings = &config.queue;
    if !settings.enabled {
        info!("Ingestion queue disabled, ingest writes directly");
        return None;
    }

    match settings.url.as_deref() {
        Some(url) => match RedisListQueue::connect(url, settings.workers).await {
            Ok(queue) => Some(Arc::new(queue)),
            Err(e) => {
                warn!(error = %e, "Redis unreachable, ingest writes directly");
                None
            }
        },
        None => {
            info!("No Redis URL, using in-process ingestion queue");
            Some(Arc::new(MemoryQueue::new()))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
