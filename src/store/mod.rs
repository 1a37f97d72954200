//! Artifact store layer.
//!
//! This module owns everything that touches the cache directory:
//!
//! - [`ArtifactStore`]: read-if-present, write-once-on-miss disk cache with
//!   atomic publication and a tee for streamed bodies
//! - [`CacheConfig`]: explicit enable flag and root path injected at startup
//! - [`CacheKey`]: injective mapping from asset identity (and render spec) to
//!   a relative path
//!
//! The store is shared by every request task behind an `Arc`. The only
//! mutation discipline is that the first successful write per key is
//! authoritative; later writes carry the same bytes and are harmless.

mod artifact;
mod key;

pub use artifact::{ArtifactStore, CacheConfig, StoreStats, LOCK_FILE};
pub use key::CacheKey;
