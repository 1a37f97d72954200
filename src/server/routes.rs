//! Router configuration.
//!
//! This module defines the HTTP routes and applies middleware for CORS,
//! compression, common response headers and tracing.
//!
//! # Route Structure
//!
//! ```text
//! /health                                  - Health check
//! /{cdn}/{package}/{version}/{*path}       - Library assets raced across mirrors
//! /{img}/{domain}/{*path}                  - Negotiated images
//! /{proxy}/{domain}/{*path}                - Images, or byte proxy for other files
//! ```
//!
//! Prefixes are configurable and each feature route can be disabled.
//!
//! # Example
//!
//! ```ignore
//! use prism_cdn::origin::HttpFetcher;
//! use prism_cdn::server::{create_router, RouterConfig};
//! use prism_cdn::store::{ArtifactStore, CacheConfig};
//!
//! let store = Arc::new(ArtifactStore::open(CacheConfig::new("/var/cache/prism")).await);
//! let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(30))?);
//!
//! let router = create_router(fetcher, store, RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cdn_handler, health_handler, image_handler, proxy_handler, AppState, DEFAULT_CACHE_MAX_AGE,
    DEFAULT_DEADLINE,
};
use crate::origin::{Fetcher, MirrorSet};
use crate::store::ArtifactStore;

/// Value of the `X-Powered-By` response header.
pub const POWERED_BY: &str = concat!("Prism ", env!("CARGO_PKG_VERSION"));

const TIMING_ALLOW_ORIGIN: HeaderName = HeaderName::from_static("timing-allow-origin");
const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Prefix of the library asset route
    pub cdn_prefix: String,

    /// Prefix of the image route
    pub img_prefix: String,

    /// Prefix of the byte proxy route
    pub proxy_prefix: String,

    pub enable_cdn: bool,
    pub enable_img: bool,
    pub enable_proxy: bool,

    /// Scheme used to reach `{domain}/{path}` origins
    pub origin_scheme: String,

    /// Mirrors consulted by the library asset route
    pub mirrors: MirrorSet,

    /// Deadline for open-ended upstream work
    pub deadline: Duration,

    /// Allowed CORS origins (None = echo any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    /// All routes enabled under `cdn`, `img` and `proxy`, a 5 second
    /// deadline, any CORS origin and a one year max-age.
    fn default() -> Self {
        Self {
            cdn_prefix: "cdn".to_string(),
            img_prefix: "img".to_string(),
            proxy_prefix: "proxy".to_string(),
            enable_cdn: true,
            enable_img: true,
            enable_proxy: true,
            origin_scheme: "http".to_string(),
            mirrors: MirrorSet::public(),
            deadline: DEFAULT_DEADLINE,
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    pub fn with_prefixes(
        mut self,
        cdn: impl Into<String>,
        img: impl Into<String>,
        proxy: impl Into<String>,
    ) -> Self {
        self.cdn_prefix = cdn.into();
        self.img_prefix = img.into();
        self.proxy_prefix = proxy.into();
        self
    }

    pub fn with_routes(mut self, cdn: bool, img: bool, proxy: bool) -> Self {
        self.enable_cdn = cdn;
        self.enable_img = img;
        self.enable_proxy = proxy;
        self
    }

    pub fn with_origin_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.origin_scheme = scheme.into();
        self
    }

    pub fn with_mirrors(mut self, mirrors: MirrorSet) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// Builds the shared [`AppState`] around `fetcher` and `store`, registers
/// the enabled feature routes plus `/health`, and applies CORS, compression,
/// common headers and (optionally) tracing.
pub fn create_router<F: Fetcher>(
    fetcher: Arc<F>,
    store: Arc<ArtifactStore>,
    config: RouterConfig,
) -> Router {
    let state = AppState::new(fetcher, store, &config.origin_scheme)
        .with_mirrors(config.mirrors.clone())
        .with_deadline(config.deadline)
        .with_cache_max_age(config.cache_max_age);

    let mut router = Router::new().route("/health", get(health_handler::<F>));

    if config.enable_cdn {
        router = router.route(
            &format!("/{}/{{package}}/{{version}}/{{*path}}", config.cdn_prefix),
            get(cdn_handler::<F>),
        );
    }
    if config.enable_img {
        router = router.route(
            &format!("/{}/{{domain}}/{{*path}}", config.img_prefix),
            get(image_handler::<F>),
        );
    }
    if config.enable_proxy {
        router = router.route(
            &format!("/{}/{{domain}}/{{*path}}", config.proxy_prefix),
            get(proxy_handler::<F>),
        );
    }

    let router = router
        .with_state(state)
        .layer(middleware::from_fn(common_headers))
        .layer(build_cors_layer(&config))
        .layer(CompressionLayer::new());

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Add `X-Powered-By` to every response and echo the request `Origin` as
/// `Timing-Allow-Origin`.
async fn common_headers(request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_POWERED_BY, HeaderValue::from_static(POWERED_BY));
    if let Some(origin) = origin {
        headers.insert(TIMING_ALLOW_ORIGIN, origin);
    }
    response
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .expose_headers([
            HeaderName::from_static("x-cached"),
            HeaderName::from_static("x-duration"),
        ])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(AllowOrigin::mirror_request()),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
