//! Origin fetcher.
//!
//! A single HTTP GET per call: no retries and no redirect handling beyond the
//! HTTP client's default. Which statuses count as success depends on the
//! caller ([`StatusPolicy`]), and every successful fetch records its
//! wall-clock duration.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use tracing::info;

use crate::error::FetchError;

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Which upstream statuses a caller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Only 200 (mirror single-file fetches)
    Exact200,
    /// Anything up to and including 302 (image origins that report redirects)
    UpTo302,
    /// Anything below 400 (byte proxy)
    Below400,
}

impl StatusPolicy {
    pub fn accepts(self, status: u16) -> bool {
        match self {
            StatusPolicy::Exact200 => status == 200,
            StatusPolicy::UpTo302 => status <= 302,
            StatusPolicy::Below400 => status < 400,
        }
    }
}

/// Response head plus streaming body, as returned by [`Fetcher::get`].
pub struct OriginResponse {
    /// HTTP status code
    pub status: u16,

    /// `Content-Type` reported by the origin, if any
    pub content_type: Option<String>,

    /// Response body
    pub body: BodyStream,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// The outcome of one origin access, consumed immediately by a pipeline.
#[derive(Debug, Clone)]
pub struct OriginResult {
    /// Raw bytes
    pub bytes: Bytes,

    /// URL the bytes came from, or the cache key for cached results
    pub source_url: String,

    /// Whether the bytes came from the artifact store
    pub cached: bool,

    /// Wall-clock duration of the fetch (zero for cached results)
    pub fetch_duration: Duration,

    /// HTTP status of the fetch (200 for cached results)
    pub status_code: u16,

    /// `Content-Type` reported by the origin
    pub content_type: Option<String>,
}

impl OriginResult {
    /// A result served from the artifact store.
    pub fn from_cache(source: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            bytes,
            source_url: source.into(),
            cached: true,
            fetch_duration: Duration::ZERO,
            status_code: 200,
            content_type: None,
        }
    }
}

/// Trait for issuing GET requests against origins.
///
/// Implementors only provide [`get`](Fetcher::get); status policy and body
/// collection are shared. Tests substitute an in-memory implementation.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Issue a GET and return the response head with a streaming body.
    ///
    /// Any status is returned as-is; only transport failures are errors.
    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError>;

    /// GET and reject statuses the policy does not accept.
    async fn open(&self, url: &str, policy: StatusPolicy) -> Result<OriginResponse, FetchError> {
        let response = self.get(url).await?;
        if !policy.accepts(response.status) {
            return Err(FetchError::Status(response.status));
        }
        Ok(response)
    }

    /// GET, apply the status policy and read the whole body.
    async fn fetch(&self, url: &str, policy: StatusPolicy) -> Result<OriginResult, FetchError> {
        let start = Instant::now();
        let OriginResponse {
            status,
            content_type,
            mut body,
        } = self.open(url, policy).await?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }

        let elapsed = start.elapsed();
        info!(
            url = url,
            status = status,
            bytes = buf.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "FETCH"
        );

        Ok(OriginResult {
            bytes: buf.freeze(),
            source_url: url.to_string(),
            cached: false,
            fetch_duration: elapsed,
            status_code: status,
            content_type,
        })
    }
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("prism-cdn/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::InvalidUrl(e.to_string())
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FetchError::BodyRead(e.to_string())))
            .boxed();

        Ok(OriginResponse {
            status,
            content_type,
            body,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
