//! Origin access.
//!
//! Everything that talks to upstream hosts lives here:
//!
//! - `identity` - what is being requested, validated once per request
//! - `fetcher` - a single GET with a status policy
//! - `mirror` - race a package asset across public CDN mirrors
//! - `relay` - cache-or-fetch byte proxy

mod fetcher;
mod identity;
mod mirror;
mod relay;

pub use fetcher::{BodyStream, Fetcher, HttpFetcher, OriginResponse, OriginResult, StatusPolicy};
pub use identity::{AssetIdentity, OriginKind, PackageAsset, RemoteAsset};
pub use mirror::{MirrorRace, MirrorResolver, MirrorSet, MirrorTemplate, WinnerGate};
pub use relay::{rewrite_github, RelayBody, RelayService, Relayed};
