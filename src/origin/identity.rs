//! Asset identities.
//!
//! An identity is derived once from the inbound request path and is never
//! mutated afterwards. It is used both to build origin URLs and to derive
//! cache keys, so every path segment is validated up front: empty, `.` and
//! `..` segments are rejected before anything touches the network or disk.

use std::fmt;
use std::path::Path;

use url::Url;

use crate::error::{FetchError, ServeError};

/// Which kind of origin an identity refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    /// A single upstream host (`{domain}/{path}`)
    RemoteDomain,
    /// A versioned library asset available on several public CDN mirrors
    MirrorPackage,
}

/// An asset living on a single upstream host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteAsset {
    domain: String,
    path: String,
}

impl RemoteAsset {
    /// Create a remote asset, validating the domain and every path segment.
    pub fn new(domain: impl Into<String>, path: impl Into<String>) -> Result<Self, ServeError> {
        let domain = domain.into();
        let path = path.into();
        validate_segment("domain", &domain)?;
        validate_path(&path)?;
        Ok(Self { domain, path })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lowercased extension of the last path segment, without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }

    /// Build the origin URL `{scheme}://{domain}/{path}`.
    ///
    /// The path is percent-encoded where needed.
    pub fn origin_url(&self, scheme: &str) -> Result<String, FetchError> {
        let mut url = Url::parse(&format!("{}://{}/", scheme, self.domain))
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", self.domain, e)))?;
        url.set_path(&self.path);
        Ok(url.into())
    }
}

impl fmt::Display for RemoteAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)
    }
}

/// A versioned static library asset (`{package}/{version}/{path}`).
///
/// Package, version and path may be empty; an incomplete asset simply has no
/// mirror candidates. Non-empty parts are validated like any other path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageAsset {
    package: String,
    version: String,
    path: String,
}

impl PackageAsset {
    pub fn new(
        package: impl Into<String>,
        version: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, ServeError> {
        let package = package.into();
        let version = version.into();
        let path = path.into();

        if !package.is_empty() {
            validate_segment("package", &package)?;
        }
        if !version.is_empty() {
            validate_segment("version", &version)?;
        }
        if !path.is_empty() {
            validate_path(&path)?;
        }

        Ok(Self {
            package,
            version,
            path,
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether package, version and path are all present.
    pub fn is_complete(&self) -> bool {
        !self.package.is_empty() && !self.version.is_empty() && !self.path.is_empty()
    }

    /// Extension of the file, including the leading dot (e.g. `.js`).
    pub fn dotted_extension(&self) -> String {
        extension_of(&self.path)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default()
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

impl fmt::Display for PackageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.package, self.version, self.path)
    }
}

/// Identity of an asset, independent of how it is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetIdentity {
    Remote(RemoteAsset),
    Package(PackageAsset),
}

impl AssetIdentity {
    pub fn kind(&self) -> OriginKind {
        match self {
            AssetIdentity::Remote(_) => OriginKind::RemoteDomain,
            AssetIdentity::Package(_) => OriginKind::MirrorPackage,
        }
    }
}

impl From<RemoteAsset> for AssetIdentity {
    fn from(asset: RemoteAsset) -> Self {
        AssetIdentity::Remote(asset)
    }
}

impl From<PackageAsset> for AssetIdentity {
    fn from(asset: PackageAsset) -> Self {
        AssetIdentity::Package(asset)
    }
}

impl fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetIdentity::Remote(asset) => asset.fmt(f),
            AssetIdentity::Package(asset) => asset.fmt(f),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_segment(what: &str, segment: &str) -> Result<(), ServeError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(ServeError::InvalidPath(format!(
            "invalid {} segment: {:?}",
            what, segment
        )));
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<(), ServeError> {
    if path.is_empty() {
        return Err(ServeError::InvalidPath("empty path".to_string()));
    }
    for segment in path.split('/') {
        validate_segment("path", segment)?;
    }
    Ok(())
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
