//! Byte proxy for non-image assets.
//!
//! Serves `{domain}/{path}` from the artifact store when present; otherwise
//! relays a single upstream GET to the client while the same bytes are tee'd
//! into the store. No transcoding happens here.
//!
//! Content-Type is derived from the path extension alone, so a hit and a miss
//! for the same URL carry the same type.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::fetcher::{BodyStream, Fetcher, StatusPolicy};
use super::identity::RemoteAsset;
use crate::error::ServeError;
use crate::render::mime;
use crate::store::{ArtifactStore, CacheKey};

const GITHUB: &str = "github.com";
const GITHUB_RAW: &str = "raw.githubusercontent.com";

/// Body of a relayed asset.
pub enum RelayBody {
    /// Complete artifact read from the store
    Stored(Bytes),
    /// Live upstream body, tee'd into the store as it is consumed
    Streaming(BodyStream),
}

/// A relayed asset ready to be written to the client.
pub struct Relayed {
    pub body: RelayBody,
    pub content_type: String,
    pub cached: bool,
}

/// Cache-or-fetch-and-relay service.
pub struct RelayService<F: Fetcher> {
    fetcher: Arc<F>,
    store: Arc<ArtifactStore>,
    scheme: String,
}

impl<F: Fetcher> RelayService<F> {
    pub fn new(fetcher: Arc<F>, store: Arc<ArtifactStore>, scheme: impl Into<String>) -> Self {
        Self {
            fetcher,
            store,
            scheme: scheme.into(),
        }
    }

    /// Open `asset` for relaying.
    ///
    /// Upstream statuses of 400 and above are returned as
    /// [`ServeError::UpstreamStatus`]. Returns once the upstream response
    /// head is available; the body is streamed lazily.
    pub async fn open(&self, asset: &RemoteAsset) -> Result<Relayed, ServeError> {
        let asset = rewrite_github(asset)?;
        let key = CacheKey::original(&asset);
        let content_type = mime::for_path(asset.path())
            .unwrap_or(mime::OCTET_STREAM)
            .to_string();

        if let Some(bytes) = self.store.lookup(&key).await {
            debug!(key = %key, "RELAY.HIT");
            return Ok(Relayed {
                body: RelayBody::Stored(bytes),
                content_type,
                cached: true,
            });
        }

        let url = asset.origin_url(&self.scheme)?;
        let response = self.fetcher.open(&url, StatusPolicy::Below400).await?;
        info!(url = %url, status = response.status, "RELAY");

        Ok(Relayed {
            body: RelayBody::Streaming(self.store.tee(key, response.body)),
            content_type,
            cached: false,
        })
    }

    /// Run [`open`](Self::open) on its own task and wait at most `deadline`
    /// for the response head.
    ///
    /// If the caller has already given up when the head arrives, the task
    /// drains the body itself so the tee still stores it.
    pub async fn open_within(
        &self,
        asset: &RemoteAsset,
        deadline: Duration,
    ) -> Result<Relayed, ServeError> {
        let service = self.clone();
        let asset = asset.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let opened = service.open(&asset).await;
            if let Err(Ok(late)) = tx.send(opened) {
                if let RelayBody::Streaming(mut body) = late.body {
                    debug!(
                        domain = asset.domain(),
                        path = asset.path(),
                        "Relay finishing in background"
                    );
                    while let Some(chunk) = body.next().await {
                        if chunk.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ServeError::Internal("relay task failed".to_string())),
            Err(_) => Err(ServeError::Timeout(deadline)),
        }
    }
}

impl<F: Fetcher> Clone for RelayService<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            scheme: self.scheme.clone(),
        }
    }
}

/// Point `github.com` blob URLs at the raw content host.
///
/// `github.com/{user}/{repo}/blob/{ref}/{file}` becomes
/// `raw.githubusercontent.com/{user}/{repo}/{ref}/{file}`. Only the first
/// `blob` segment is dropped. Other domains pass through unchanged.
pub fn rewrite_github(asset: &RemoteAsset) -> Result<RemoteAsset, ServeError> {
    if !asset.domain().eq_ignore_ascii_case(GITHUB) {
        return Ok(asset.clone());
    }

    let mut segments: Vec<&str> = asset.path().split('/').collect();
    if let Some(pos) = segments.iter().position(|s| *s == "blob") {
        segments.remove(pos);
    }
    RemoteAsset::new(GITHUB_RAW, segments.join("/"))
}
