//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /{cdn}/{package}/{version}/{path}` - Mirror-raced library asset
//! - `GET /{img}/{domain}/{path}` - Negotiated, transcoded image
//! - `GET /{proxy}/{domain}/{path}` - Images as above, other files via the cached byte proxy
//! - `GET /health` - Health check endpoint

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::ServeError;
use crate::origin::{
    Fetcher, MirrorResolver, MirrorSet, PackageAsset, RelayBody, RelayService, RemoteAsset,
};
use crate::render::{mime, negotiate, ClientHints, ImageService, Transcoder};
use crate::store::{ArtifactStore, StoreStats};

/// Default client-facing deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Default `Cache-Control` max-age: one year.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 31_536_000;

/// Client hints the image route asks browsers to send.
pub const ACCEPT_CH: &str = "DPR, Width, Viewport-Width, Downlink";

/// Request headers that select an image rendition.
pub const VARY_HINTS: &str = "Accept, DPR, Width, Save-Data, Downlink";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<F: Fetcher> {
    /// Image pipeline
    pub images: ImageService<F>,

    /// Package resolver
    pub mirrors: MirrorResolver<F>,

    /// Byte proxy
    pub relay: RelayService<F>,

    /// Artifact store shared by all pipelines
    pub store: Arc<ArtifactStore>,

    /// Deadline for open-ended upstream work
    pub deadline: Duration,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    fetcher: Arc<F>,
}

impl<F: Fetcher> AppState<F> {
    /// Wire the pipelines around one fetcher and one store.
    pub fn new(fetcher: Arc<F>, store: Arc<ArtifactStore>, origin_scheme: &str) -> Self {
        Self {
            images: ImageService::new(
                Arc::clone(&fetcher),
                Arc::clone(&store),
                Transcoder::default(),
                origin_scheme,
            ),
            mirrors: MirrorResolver::new(Arc::clone(&fetcher), Arc::clone(&store), MirrorSet::public()),
            relay: RelayService::new(Arc::clone(&fetcher), Arc::clone(&store), origin_scheme),
            store,
            deadline: DEFAULT_DEADLINE,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            fetcher,
        }
    }

    /// Replace the mirror set used by the CDN route.
    pub fn with_mirrors(mut self, mirrors: MirrorSet) -> Self {
        self.mirrors = MirrorResolver::new(Arc::clone(&self.fetcher), Arc::clone(&self.store), mirrors);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

impl<F: Fetcher> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            images: self.images.clone(),
            mirrors: self.mirrors.clone(),
            relay: self.relay.clone(),
            store: Arc::clone(&self.store),
            deadline: self.deadline,
            cache_max_age: self.cache_max_age,
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Whether the disk cache is active
    pub cache_enabled: bool,

    /// Store activity since startup
    pub cache: StoreStats,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl ServeError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServeError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            ServeError::UpstreamStatus(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ServeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServeError::UpstreamUnavailable(_)
            | ServeError::DecodeFailure(_)
            | ServeError::UnsupportedFormat(_)
            | ServeError::EncodeFailure(_)
            | ServeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ServeError::InvalidPath(_) => "invalid_path",
            ServeError::UpstreamUnavailable(_) => "upstream_unavailable",
            ServeError::UpstreamStatus(_) => "upstream_status",
            ServeError::DecodeFailure(_) => "decode_failure",
            ServeError::UnsupportedFormat(_) => "unsupported_format",
            ServeError::EncodeFailure(_) => "encode_failure",
            ServeError::Timeout(_) => "timeout",
            ServeError::Internal(_) => "internal",
        }
    }
}

/// Convert ServeError to HTTP response.
///
/// The body is the canonical reason phrase of the status. 5xx errors are
/// logged at ERROR, 404s at DEBUG and other 4xx at WARN.
impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                self
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                self
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                self
            );
        }

        let reason = status.canonical_reason().unwrap_or_default();
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            reason,
        )
            .into_response()
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle library asset requests.
///
/// # Endpoint
///
/// `GET /{cdn}/{package}/{version}/{path}`
///
/// # Response
///
/// - `200 OK`: the asset, `Content-Type` from the path extension
/// - `400 Bad Request`: invalid path segments
/// - `504 Gateway Timeout`: no mirror delivered within the deadline
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Cached: yes|no`
pub async fn cdn_handler<F: Fetcher>(
    State(state): State<AppState<F>>,
    Path((package, version, path)): Path<(String, String, String)>,
) -> Result<Response, ServeError> {
    let asset = PackageAsset::new(package, version, path)?;
    let result = state
        .mirrors
        .resolve(&asset)
        .winner_within(state.deadline)
        .await?;

    let content_type = mime::for_path(asset.path()).unwrap_or(mime::OCTET_STREAM);
    let cached = if result.cached { "yes" } else { "no" };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, header_value(content_type)),
            (header::CACHE_CONTROL, header_value(&state.cache_control())),
            (header::HeaderName::from_static("x-cached"), HeaderValue::from_static(cached)),
        ],
        Body::from(result.bytes),
    )
        .into_response())
}

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /{img}/{domain}/{path}`
///
/// # Request signals
///
/// Headers `Accept`, `DPR`, `Width`, `Viewport-Width`, `Downlink`,
/// `Save-Data`, or the query parameters `dpr`, `width`, `viewport-width`,
/// `downlink`, `save-data` and `quality`.
///
/// # Response
///
/// - `200 OK`: the rendered image in the negotiated format
/// - `400 Bad Request`: invalid path segments
/// - upstream status: when the origin rejects the request
/// - `500 Internal Server Error`: transport, decode or encode failure
/// - `504 Gateway Timeout`: rendering exceeded the deadline
///
/// # Headers
///
/// - `X-Cached: optimized|original|no`
/// - `X-Duration`: time spent in the pipeline
/// - `Accept-CH`, `Vary`, `Cache-Control`
pub async fn image_handler<F: Fetcher>(
    State(state): State<AppState<F>>,
    Path((domain, path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServeError> {
    let start = Instant::now();
    let asset = RemoteAsset::new(domain, path)?;
    render_image(&state, asset, &query, &headers, start).await
}

async fn render_image<F: Fetcher>(
    state: &AppState<F>,
    asset: RemoteAsset,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    start: Instant,
) -> Result<Response, ServeError> {
    let spec = negotiate(&ClientHints::from_request(headers, query), asset.path());

    let rendered = state
        .images
        .render_within(asset, spec, state.deadline)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, header_value(&rendered.mime)),
            (header::CACHE_CONTROL, header_value(&state.cache_control())),
            (
                header::HeaderName::from_static("x-cached"),
                HeaderValue::from_static(rendered.cache_status.as_header()),
            ),
            (
                header::HeaderName::from_static("x-duration"),
                header_value(&format!("{:?}", start.elapsed())),
            ),
            (
                header::HeaderName::from_static("accept-ch"),
                HeaderValue::from_static(ACCEPT_CH),
            ),
            (header::VARY, HeaderValue::from_static(VARY_HINTS)),
        ],
        Body::from(rendered.bytes),
    )
        .into_response())
}

/// Handle proxy requests.
///
/// Paths the image pipeline can render are handled exactly like
/// [`image_handler`]; everything else is relayed byte for byte.
///
/// # Endpoint
///
/// `GET /{proxy}/{domain}/{path}`
///
/// # Response
///
/// - `200 OK`: stored bytes, or the upstream body relayed as it arrives
/// - upstream status: when the origin answers 400 or above
/// - `504 Gateway Timeout`: no upstream response head within the deadline
///
/// # Headers
///
/// - `X-Cached: yes|no`
pub async fn proxy_handler<F: Fetcher>(
    State(state): State<AppState<F>>,
    Path((domain, path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServeError> {
    let start = Instant::now();
    let asset = RemoteAsset::new(domain, path)?;
    if state.images.renders(asset.path()) {
        return render_image(&state, asset, &query, &headers, start).await;
    }

    let relayed = state.relay.open_within(&asset, state.deadline).await?;

    let cached = if relayed.cached { "yes" } else { "no" };
    let body = match relayed.body {
        RelayBody::Stored(bytes) => Body::from(bytes),
        RelayBody::Streaming(stream) => Body::from_stream(stream),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, header_value(&relayed.content_type)),
            (header::CACHE_CONTROL, header_value(&state.cache_control())),
            (header::HeaderName::from_static("x-cached"), HeaderValue::from_static(cached)),
        ],
        body,
    )
        .into_response())
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "cache_enabled": true,
///   "cache": { "hits": 0, "misses": 0, "writes": 0, "write_failures": 0 }
/// }
/// ```
pub async fn health_handler<F: Fetcher>(State(state): State<AppState<F>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_enabled: state.store.is_enabled(),
        cache: state.store.stats(),
    })
}
