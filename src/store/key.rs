//! Cache key derivation.
//!
//! A cache key is a relative path below the cache root. Keys are built from
//! structured, pre-validated segments and live in disjoint namespaces:
//!
//! ```text
//! orig/{domain}/{path}                               raw origin bytes
//! img/{domain}/{path}--{width}px@{dpr}--{quality}.{ext}  rendered images
//! cdn/{package}/{version}/{path}                     mirror assets
//! ```
//!
//! The rendered suffix is parsed unambiguously from the right (the extension
//! has no dot, quality is digits, DPR is a positive finite decimal without
//! `--`), so distinct `(asset, spec)` pairs never share a key.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::origin::{AssetIdentity, PackageAsset, RemoteAsset};
use crate::render::RenderSpec;

const ORIGINALS: &str = "orig";
const RENDERED: &str = "img";
const PACKAGES: &str = "cdn";

/// Relative location of an artifact below the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(PathBuf);

impl CacheKey {
    /// Key for the un-transcoded bytes of an asset.
    ///
    /// Returns `None` for incomplete package assets, which are never cached.
    pub fn source(identity: &AssetIdentity) -> Option<Self> {
        match identity {
            AssetIdentity::Remote(asset) => Some(Self::original(asset)),
            AssetIdentity::Package(asset) => Self::package(asset),
        }
    }

    /// Key for raw bytes fetched from a single upstream host.
    pub fn original(asset: &RemoteAsset) -> Self {
        let mut path = PathBuf::from(ORIGINALS);
        path.push(asset.domain());
        path.push(asset.path());
        Self(path)
    }

    /// Key for a mirror-resolved package file.
    pub fn package(asset: &PackageAsset) -> Option<Self> {
        if !asset.is_complete() {
            return None;
        }
        let mut path = PathBuf::from(PACKAGES);
        path.push(asset.package());
        path.push(asset.version());
        path.push(asset.path());
        Some(Self(path))
    }

    /// Key for an image rendered with the given spec.
    ///
    /// Only the rendering-relevant part of the spec (mime, width, dpr,
    /// quality) takes part in the key.
    pub fn rendered(asset: &RemoteAsset, spec: &RenderSpec) -> Self {
        let file = format!(
            "{}--{}px@{}--{}.{}",
            asset.path(),
            spec.width,
            spec.dpr,
            spec.quality,
            spec.cache_extension()
        );
        let mut path = PathBuf::from(RENDERED);
        path.push(asset.domain());
        path.push(file);
        Self(path)
    }

    /// The relative path of this key.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
