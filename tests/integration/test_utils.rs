//! Test utilities for integration tests.
//!
//! This module provides an in-memory [`Fetcher`], image fixtures and router
//! builders shared by the integration tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use prism_cdn::error::FetchError;
use prism_cdn::origin::{Fetcher, MirrorSet, MirrorTemplate, OriginResponse};
use prism_cdn::store::{ArtifactStore, CacheConfig};
use prism_cdn::{create_router, RouterConfig};

// =============================================================================
// Mock Fetcher
// =============================================================================

#[derive(Clone)]
struct Route {
    status: u16,
    body: Bytes,
    content_type: Option<String>,
    delay: Duration,
}

/// In-memory origin keyed by full URL.
///
/// Unknown URLs fail with a network error. Every call is recorded.
#[derive(Default)]
pub struct MockFetcher {
    routes: HashMap<String, Route>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `status` and `body`.
    pub fn with(self, url: &str, status: u16, body: impl Into<Bytes>) -> Self {
        self.with_delayed(url, status, body, Duration::ZERO)
    }

    /// Answer `url` after `delay`.
    pub fn with_delayed(
        mut self,
        url: &str,
        status: u16,
        body: impl Into<Bytes>,
        delay: Duration,
    ) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status,
                body: body.into(),
                content_type: None,
                delay,
            },
        );
        self
    }

    /// Answer `url` with a `Content-Type` header.
    pub fn with_typed(mut self, url: &str, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                body: body.into(),
                content_type: Some(content_type.to_string()),
                delay: Duration::ZERO,
            },
        );
        self
    }

    /// Total number of GETs issued.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of GETs issued for `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(url.to_string());

        let Some(route) = self.routes.get(url).cloned() else {
            return Err(FetchError::Network(format!("connection refused: {}", url)));
        };
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }

        // Split the body so streaming consumers see more than one chunk.
        let mid = route.body.len() / 2;
        let chunks = vec![
            Ok(route.body.slice(..mid)),
            Ok(route.body.slice(mid..)),
        ];
        Ok(OriginResponse {
            status: route.status,
            content_type: route.content_type,
            body: stream::iter(chunks).boxed(),
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Create a JPEG with a gradient pattern.
pub fn make_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

/// Create a PNG with a gradient pattern.
pub fn make_png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Three fake mirrors: `http://mirror-{a,b,c}.test/{package}/{version}/{path}`.
pub fn test_mirrors() -> MirrorSet {
    MirrorSet::new(vec![
        MirrorTemplate::versioned("a", "http://mirror-a.test"),
        MirrorTemplate::versioned("b", "http://mirror-b.test"),
        MirrorTemplate::versioned("c", "http://mirror-c.test"),
    ])
}

// =============================================================================
// Harness
// =============================================================================

/// A router wired to a mock origin and a temporary cache.
pub struct TestApp {
    pub router: Router,
    pub fetcher: Arc<MockFetcher>,
    pub store: Arc<ArtifactStore>,
    _cache_dir: TempDir,
}

impl TestApp {
    pub async fn new(fetcher: MockFetcher) -> Self {
        Self::with_config(fetcher, test_config()).await
    }

    pub async fn with_config(fetcher: MockFetcher, config: RouterConfig) -> Self {
        let cache_dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(CacheConfig::new(cache_dir.path())).await);
        let fetcher = Arc::new(fetcher);
        let router = create_router(Arc::clone(&fetcher), Arc::clone(&store), config);
        Self {
            router,
            fetcher,
            store,
            _cache_dir: cache_dir,
        }
    }

    /// Wait until the store has completed at least `writes` writes.
    pub async fn wait_for_writes(&self, writes: u64) {
        for _ in 0..200 {
            if self.store.stats().writes >= writes {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} cache writes, saw {}",
            writes,
            self.store.stats().writes
        );
    }
}

/// Router config for tests: no tracing, fake mirrors, 2 second deadline.
pub fn test_config() -> RouterConfig {
    RouterConfig::default()
        .with_tracing(false)
        .with_mirrors(test_mirrors())
        .with_deadline(Duration::from_secs(2))
}
