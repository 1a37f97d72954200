//! Image pipeline.
//!
//! Orchestrates one image request:
//!
//! ```text
//! CacheCheck ──hit──────────────────────────────────────────────▶ Respond
//!     │ miss
//!     ▼
//! OriginalCacheCheck ──hit──┐
//!     │ miss                │
//!     ▼                     ▼
//!   Fetch ───────────▶ Decode + Transcode ──▶ CacheWrite ──▶ Respond
//! ```
//!
//! Any failure ends the request with the corresponding [`ServeError`].
//! Cache writes run detached and never delay the response. A fetched original
//! is stored only once it has transcoded, and a stored original that no
//! longer decodes is fetched again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::encoder::Transcoder;
use super::mime;
use super::negotiate::RenderSpec;
use crate::error::ServeError;
use crate::origin::{Fetcher, RemoteAsset, StatusPolicy};
use crate::store::{ArtifactStore, CacheKey};

/// Where the bytes of a rendered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Rendered artifact served from the store
    Optimized,
    /// Original served from the store, rendered now
    Original,
    /// Original fetched from the origin, rendered now
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Cached` response header.
    pub fn as_header(self) -> &'static str {
        match self {
            CacheStatus::Optimized => "optimized",
            CacheStatus::Original => "original",
            CacheStatus::Miss => "no",
        }
    }
}

/// A rendered image ready to be written to the client.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Bytes,
    pub mime: String,
    pub cache_status: CacheStatus,
}

/// Fetch, transcode and cache images from single-host origins.
pub struct ImageService<F: Fetcher> {
    fetcher: Arc<F>,
    store: Arc<ArtifactStore>,
    transcoder: Transcoder,
    scheme: String,
}

impl<F: Fetcher> ImageService<F> {
    pub fn new(
        fetcher: Arc<F>,
        store: Arc<ArtifactStore>,
        transcoder: Transcoder,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            store,
            transcoder,
            scheme: scheme.into(),
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Whether `path` names an image this service can render.
    pub fn renders(&self, path: &str) -> bool {
        mime::for_path(path)
            .filter(|m| m.starts_with("image/"))
            .is_some_and(|m| self.transcoder.registry().supports(&mime::canonicalize(m)))
    }

    /// Run the pipeline for `asset` rendered per `spec`.
    pub async fn render(&self, asset: &RemoteAsset, spec: &RenderSpec) -> Result<Rendered, ServeError> {
        let rendered_key = CacheKey::rendered(asset, spec);
        if let Some(bytes) = self.store.lookup(&rendered_key).await {
            return Ok(Rendered {
                bytes,
                mime: spec.target_mime.clone(),
                cache_status: CacheStatus::Optimized,
            });
        }

        let original_key = CacheKey::original(asset);
        if let Some(original) = self.store.lookup(&original_key).await {
            match self.transcode(original, spec).await {
                Ok(encoded) => {
                    return Ok(self.finish(asset, spec, rendered_key, encoded, CacheStatus::Original))
                }
                Err(ServeError::DecodeFailure(e)) => {
                    warn!(key = %original_key, "Cached original does not decode, refetching: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        let url = asset.origin_url(&self.scheme)?;
        let result = self.fetcher.fetch(&url, StatusPolicy::UpTo302).await?;
        let encoded = self.transcode(result.bytes.clone(), spec).await?;
        // Only originals that transcoded are kept.
        self.store.put_detached(original_key, result.bytes);

        Ok(self.finish(asset, spec, rendered_key, encoded, CacheStatus::Miss))
    }

    async fn transcode(&self, original: Bytes, spec: &RenderSpec) -> Result<Bytes, ServeError> {
        let transcoder = self.transcoder.clone();
        let job_spec = spec.clone();
        let encoded = tokio::task::spawn_blocking(move || transcoder.transcode(&original, &job_spec))
            .await
            .map_err(|e| ServeError::Internal(format!("transcode task failed: {}", e)))??;
        Ok(encoded)
    }

    fn finish(
        &self,
        asset: &RemoteAsset,
        spec: &RenderSpec,
        rendered_key: CacheKey,
        encoded: Bytes,
        cache_status: CacheStatus,
    ) -> Rendered {
        debug!(
            asset = %asset,
            mime = %spec.target_mime,
            width = spec.width,
            quality = spec.quality,
            bytes = encoded.len(),
            "Rendered"
        );
        self.store.put_detached(rendered_key, encoded.clone());

        Rendered {
            bytes: encoded,
            mime: spec.target_mime.clone(),
            cache_status,
        }
    }

    /// Run [`render`](Self::render) on its own task and wait at most
    /// `deadline` for it.
    ///
    /// On timeout the task keeps going, so its cache writes still land.
    pub async fn render_within(
        &self,
        asset: RemoteAsset,
        spec: RenderSpec,
        deadline: Duration,
    ) -> Result<Rendered, ServeError> {
        let service = self.clone();
        let task = tokio::spawn(async move { service.render(&asset, &spec).await });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ServeError::Internal(format!("render task failed: {}", e))),
            Err(_) => Err(ServeError::Timeout(deadline)),
        }
    }
}

impl<F: Fetcher> Clone for ImageService<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            transcoder: self.transcoder.clone(),
            scheme: self.scheme.clone(),
        }
    }
}
