//! Prism CDN - on-the-fly image delivery proxy.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism_cdn::{
    config::Config,
    origin::HttpFetcher,
    server::{create_router, RouterConfig},
    store::ArtifactStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let router_config = config.router_config();
    log_configuration(&config, &router_config);

    let store = Arc::new(ArtifactStore::open(config.cache_config()).await);
    match store.root() {
        Some(root) => info!("  Disk cache: {}", root.display()),
        None if config.cache_enabled => {
            warn!("  Disk cache: DEGRADED - every request goes to the origin")
        }
        None => info!("  Disk cache: disabled"),
    }

    let fetcher = match HttpFetcher::new(config.origin_timeout()) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let router = create_router(fetcher, store, router_config);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("");

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Log the effective configuration and enabled routes.
fn log_configuration(config: &Config, router: &RouterConfig) {
    info!("Prism CDN v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");

    let routes = [
        (router.enable_cdn, &router.cdn_prefix, "{package}/{version}/{path}"),
        (router.enable_img, &router.img_prefix, "{domain}/{path}"),
        (router.enable_proxy, &router.proxy_prefix, "{domain}/{path}"),
    ];
    for (enabled, prefix, pattern) in routes {
        if enabled {
            info!("  Route: /{}/{}", prefix, pattern);
        }
    }

    info!("  Origin scheme: {}", router.origin_scheme);
    info!("  Deadline: {}s", config.deadline_secs);
    info!("  Origin timeout: {}s", config.origin_timeout_secs);
    match &router.cors_origins {
        Some(origins) => info!("  CORS origins: {}", origins.join(", ")),
        None => info!("  CORS origins: any"),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "prism_cdn=debug,tower_http=debug"
    } else {
        "prism_cdn=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
