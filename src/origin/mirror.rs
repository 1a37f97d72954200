//! Mirror resolver.
//!
//! Versioned library assets are published on several public CDNs. Given a
//! [`PackageAsset`], the resolver builds one candidate URL per mirror
//! template and races a fetch against each of them:
//!
//! ```text
//!                  ┌──────────── cache hit ────────────┐
//! resolve(asset) ──┤                                   ├──▶ MirrorRace (≤ 1 result)
//!                  └── miss ─▶ fan out N fetches ──────┘
//!                              first 200 claims the WinnerGate,
//!                              is cached once, cancels the rest
//! ```
//!
//! The returned [`MirrorRace`] yields at most one result. When every
//! candidate fails it yields nothing and never completes: the resolver
//! reports no error by itself, so callers must always bound it with their
//! own deadline (see [`MirrorRace::winner_within`]).

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::fetcher::{Fetcher, OriginResult, StatusPolicy};
use super::identity::PackageAsset;
use crate::error::ServeError;
use crate::store::{ArtifactStore, CacheKey};

// =============================================================================
// Mirror templates
// =============================================================================

/// How a mirror lays out versioned files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorTemplate {
    /// `{base}/{package}/{version}/{path}`
    Versioned { name: String, base: String },

    /// `{base}/{package}/{stem}-{version}[.min]{ext}`, as used by the ASP.NET CDN
    AspNet { name: String, base: String },
}

impl MirrorTemplate {
    pub fn versioned(name: impl Into<String>, base: impl Into<String>) -> Self {
        MirrorTemplate::Versioned {
            name: name.into(),
            base: base.into(),
        }
    }

    pub fn aspnet(name: impl Into<String>, base: impl Into<String>) -> Self {
        MirrorTemplate::AspNet {
            name: name.into(),
            base: base.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MirrorTemplate::Versioned { name, .. } | MirrorTemplate::AspNet { name, .. } => name,
        }
    }

    /// Candidate URL for `asset`, or `None` when the asset is incomplete or
    /// the resulting URL does not parse.
    pub fn url_for(&self, asset: &PackageAsset) -> Option<String> {
        if !asset.is_complete() {
            return None;
        }

        let raw = match self {
            MirrorTemplate::Versioned { base, .. } => format!(
                "{}/{}/{}/{}",
                base.trim_end_matches('/'),
                asset.package(),
                asset.version(),
                asset.path()
            ),
            MirrorTemplate::AspNet { base, .. } => {
                let ext = asset.dotted_extension();
                let path = asset.path();
                let stem = &path[..path.len() - ext.len()];
                let (stem, min) = match stem.strip_suffix(".min") {
                    Some(stem) => (stem, ".min"),
                    None => (stem, ""),
                };
                format!(
                    "{}/{}/{}-{}{}{}",
                    base.trim_end_matches('/'),
                    asset.package(),
                    stem,
                    asset.version(),
                    min,
                    ext
                )
            }
        };

        Url::parse(&raw).ok().map(String::from)
    }
}

/// The fixed, ordered set of mirrors consulted for package assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSet {
    templates: Vec<MirrorTemplate>,
}

impl MirrorSet {
    pub fn new(templates: Vec<MirrorTemplate>) -> Self {
        Self { templates }
    }

    /// Well-known public CDNs.
    pub fn public() -> Self {
        Self::new(vec![
            MirrorTemplate::versioned("cdnjs", "https://cdnjs.cloudflare.com/ajax/libs"),
            MirrorTemplate::versioned("jsdelivr", "https://cdn.jsdelivr.net"),
            MirrorTemplate::versioned("google", "https://ajax.googleapis.com/ajax/libs"),
            MirrorTemplate::versioned("maxcdn", "https://oss.maxcdn.com"),
            MirrorTemplate::versioned("yandex", "https://yastatic.net"),
            MirrorTemplate::aspnet("aspnet", "https://ajax.aspnetcdn.com/ajax"),
        ])
    }

    pub fn templates(&self) -> &[MirrorTemplate] {
        &self.templates
    }

    /// Candidate URLs for `asset`, in template order. Templates that cannot
    /// produce a URL are skipped.
    pub fn candidates(&self, asset: &PackageAsset) -> Vec<String> {
        self.templates
            .iter()
            .filter_map(|template| template.url_for(asset))
            .collect()
    }
}

impl Default for MirrorSet {
    fn default() -> Self {
        Self::public()
    }
}

// =============================================================================
// Winner gate
// =============================================================================

/// One-shot exclusive claim: exactly one caller ever observes `true`.
#[derive(Debug, Default)]
pub struct WinnerGate {
    claimed: AtomicBool,
}

impl WinnerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the gate. Returns `true` for the first caller only.
    pub fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Mirror race
// =============================================================================

/// Asynchronous, finite, non-restartable stream of at most one result.
///
/// Does not terminate when every candidate fails.
pub struct MirrorRace {
    inner: BoxStream<'static, OriginResult>,
}

impl MirrorRace {
    fn new(mut rx: mpsc::Receiver<OriginResult>) -> Self {
        let inner = stream::once(async move {
            match rx.recv().await {
                Some(result) => result,
                // Every candidate failed: no result and no terminal signal.
                None => futures::future::pending().await,
            }
        })
        .boxed();
        Self { inner }
    }

    /// Await the winner, giving up after `deadline`.
    ///
    /// In-flight fetches keep running after a timeout; a late winner still
    /// populates the cache.
    pub async fn winner_within(mut self, deadline: Duration) -> Result<OriginResult, ServeError> {
        match tokio::time::timeout(deadline, self.next()).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) | Err(_) => Err(ServeError::Timeout(deadline)),
        }
    }
}

impl Stream for MirrorRace {
    type Item = OriginResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Races package fetches across a [`MirrorSet`] and caches the first winner.
pub struct MirrorResolver<F: Fetcher> {
    fetcher: Arc<F>,
    store: Arc<ArtifactStore>,
    mirrors: Arc<MirrorSet>,
}

impl<F: Fetcher> MirrorResolver<F> {
    pub fn new(fetcher: Arc<F>, store: Arc<ArtifactStore>, mirrors: MirrorSet) -> Self {
        Self {
            fetcher,
            store,
            mirrors: Arc::new(mirrors),
        }
    }

    pub fn mirrors(&self) -> &MirrorSet {
        &self.mirrors
    }

    /// Start resolving `asset`.
    ///
    /// The cache is checked first; a hit yields a `cached` result without any
    /// network access. On a miss one fetch per candidate is spawned.
    pub fn resolve(&self, asset: &PackageAsset) -> MirrorRace {
        let (tx, rx) = mpsc::channel(1);
        let race = Race {
            asset: asset.clone(),
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            mirrors: Arc::clone(&self.mirrors),
        };
        tokio::spawn(race.run(tx));
        MirrorRace::new(rx)
    }
}

impl<F: Fetcher> Clone for MirrorResolver<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            mirrors: Arc::clone(&self.mirrors),
        }
    }
}

struct Race<F: Fetcher> {
    asset: PackageAsset,
    fetcher: Arc<F>,
    store: Arc<ArtifactStore>,
    mirrors: Arc<MirrorSet>,
}

impl<F: Fetcher> Race<F> {
    async fn run(self, tx: mpsc::Sender<OriginResult>) {
        let key = CacheKey::package(&self.asset);

        if let Some(key) = &key {
            if let Some(bytes) = self.store.lookup(key).await {
                info!(key = %key, "CACHE");
                let _ = tx.send(OriginResult::from_cache(key.to_string(), bytes)).await;
                return;
            }
        }

        let candidates = self.mirrors.candidates(&self.asset);
        if candidates.is_empty() {
            warn!(asset = %self.asset, "No mirror candidates for asset");
            return;
        }

        let gate = Arc::new(WinnerGate::new());
        let cancel = CancellationToken::new();
        let failures_left = Arc::new(AtomicUsize::new(candidates.len()));

        for url in candidates {
            let candidate = Candidate {
                url,
                asset: self.asset.clone(),
                key: key.clone(),
                fetcher: Arc::clone(&self.fetcher),
                store: Arc::clone(&self.store),
                gate: Arc::clone(&gate),
                cancel: cancel.clone(),
                failures_left: Arc::clone(&failures_left),
                tx: tx.clone(),
            };
            tokio::spawn(candidate.run());
        }
    }
}

struct Candidate<F: Fetcher> {
    url: String,
    asset: PackageAsset,
    key: Option<CacheKey>,
    fetcher: Arc<F>,
    store: Arc<ArtifactStore>,
    gate: Arc<WinnerGate>,
    cancel: CancellationToken,
    failures_left: Arc<AtomicUsize>,
    tx: mpsc::Sender<OriginResult>,
}

impl<F: Fetcher> Candidate<F> {
    async fn run(self) {
        debug!(url = %self.url, "GET");

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(url = %self.url, "Cancelled, another mirror won");
                return;
            }
            outcome = self.fetcher.fetch(&self.url, StatusPolicy::Exact200) => outcome,
        };

        match outcome {
            Ok(result) if !result.bytes.is_empty() => {
                if !self.gate.claim() {
                    debug!(url = %self.url, "Lost the race");
                    return;
                }
                self.cancel.cancel();
                info!(
                    url = %self.url,
                    elapsed_ms = result.fetch_duration.as_millis() as u64,
                    "Mirror won"
                );
                if let Some(key) = self.key {
                    self.store.put_detached(key, result.bytes.clone());
                }
                let _ = self.tx.send(result).await;
                return;
            }
            Ok(_) => debug!(url = %self.url, "Mirror returned an empty body"),
            Err(e) => debug!(url = %self.url, "Mirror failed: {}", e),
        }

        if self.failures_left.fetch_sub(1, Ordering::AcqRel) == 1 {
            warn!(asset = %self.asset, "No mirror produced a result");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
