//! TLM Proxy - serve HTJ2K frames one resolution level at a time.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tlm_proxy::{
    config::Config,
    create_s3_client,
    frame::{DistributedCache, FrameService, LocalFrameCache, MemcachedClient, TieredCache},
    io::S3FrameSource,
    server::{create_shared_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("tlm-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  S3 bucket: {}", config.s3_bucket);
    if let Some(ref prefix) = config.s3_prefix {
        info!("  S3 prefix: {}", prefix);
    }
    if let Some(ref endpoint) = config.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.s3_region);

    let s3_client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
    let source = S3FrameSource::new(
        s3_client,
        config.s3_bucket.clone(),
        config.s3_prefix.clone(),
        config.fetch_timeout(),
    );

    let cache = build_cache(&config);
    let frame_service = Arc::new(FrameService::new(source, cache));
    let router = create_shared_router(frame_service.clone(), build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!(
        "  curl 'http://{}/runtime/datastore/<d>/imageset/<s>/imageframe/<f>?startLevel=0&endLevel=0'",
        addr
    );

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    // Let in-flight cache seeding finish
    frame_service.wait_for_background().await;
    ExitCode::SUCCESS
}

/// Assemble the cache tiers enabled in the configuration.
fn build_cache(config: &Config) -> TieredCache {
    let local = if config.local_cache {
        info!(
            "  Local cache: {}MB, ttl {}s",
            config.local_cache_size / (1024 * 1024),
            config.cache_ttl
        );
        Some(LocalFrameCache::with_capacity(
            config.local_cache_size,
            config.cache_ttl(),
        ))
    } else {
        warn!("  Local cache: disabled");
        None
    };

    let remote = config.memcached_address.as_ref().map(|address| {
        info!("  Memcached: {}", address);
        let client = MemcachedClient::new(address.clone())
            .with_timeout(config.memcached_timeout())
            .with_max_value_size(config.memcached_max_value);
        Arc::new(client) as Arc<dyn DistributedCache>
    });
    if remote.is_none() {
        info!("  Memcached: disabled");
    }

    TieredCache::new(local, remote)
        .with_ttl(config.cache_ttl())
        .with_namespace(config.cache_namespace.clone())
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tlm_proxy=debug,tower_http=debug"
    } else {
        "tlm_proxy=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
