//! # Prism CDN
//!
//! An on-the-fly image delivery proxy.
//!
//! A request names an image on some upstream host (or a versioned library
//! file published on public CDNs). The proxy negotiates the best rendition
//! for the client from its hints, fetches the original, transcodes it and
//! serves the result, persisting every artifact on disk so identical
//! requests never repeat network or CPU work.
//!
//! ## Features
//!
//! - **Client-hint negotiation**: `DPR`, `Width`, `Viewport-Width`,
//!   `Downlink`, `Save-Data` and `Accept` drive size, format and quality
//! - **Mirror racing**: library files are fetched from several public CDNs
//!   at once; the first success wins and is cached exactly once
//! - **Disk cache**: atomic, idempotent artifact writes that fail open
//! - **Byte proxy**: cached relaying of arbitrary upstream files
//!
//! ## Architecture
//!
//! - [`store`] - Artifact store and cache keys
//! - [`origin`] - Asset identities, origin fetcher, mirror race, byte proxy
//! - [`render`] - Negotiation, transcoding and the image pipeline
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prism_cdn::{create_router, ArtifactStore, CacheConfig, HttpFetcher, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(ArtifactStore::open(CacheConfig::new("/tmp/prism-cdn")).await);
//!     let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(30))?);
//!     let router = create_router(fetcher, store, RouterConfig::default());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod origin;
pub mod render;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{FetchError, ServeError, StoreError, TranscodeError};
pub use origin::{
    AssetIdentity, Fetcher, HttpFetcher, MirrorRace, MirrorResolver, MirrorSet, MirrorTemplate,
    OriginKind, OriginResponse, OriginResult, PackageAsset, RelayService, RemoteAsset,
    StatusPolicy, WinnerGate,
};
pub use render::{
    compute_quality, negotiate, CacheStatus, ClientHints, EncoderRegistry, FormatEncoder,
    ImageService, RenderSpec, Transcoder,
};
pub use server::{create_router, AppState, HealthResponse, RouterConfig};
pub use store::{ArtifactStore, CacheConfig, CacheKey, StoreStats};
