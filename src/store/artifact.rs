//! Disk-backed artifact store.
//!
//! Artifacts are written once per key and never mutated in place: every write
//! goes to a temporary file in the destination directory and is published
//! with an atomic rename, so readers never observe a half-written file and
//! concurrent writers of the same (identical) payload are harmless.
//!
//! The store fails open. When it cannot be initialised it runs in
//! cache-disabled mode, where every lookup is a miss and every write a no-op;
//! read faults are reported as misses and write faults are only logged.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use crate::error::StoreError;

/// Name of the sentinel file written at startup to validate writability.
pub const LOCK_FILE: &str = "lock";

/// Chunks a tee may hold for the disk writer before it stops caching.
pub const TEE_BUFFER: usize = 64;

/// Monotonic suffix for temporary files, unique within the process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the artifact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether disk caching is requested
    pub enabled: bool,

    /// Root directory of the cache tree
    pub root: PathBuf,
}

impl CacheConfig {
    /// An enabled cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            root: root.into(),
        }
    }

    /// A disabled cache.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            root: PathBuf::new(),
        }
    }
}

/// Counters describing store activity since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
}

// =============================================================================
// Artifact Store
// =============================================================================

/// Content-addressed-by-path disk cache shared by all request tasks.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    /// Cache root, `None` in cache-disabled mode
    root: Option<PathBuf>,

    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

impl ArtifactStore {
    /// Open the store described by `config`.
    ///
    /// Creates the root directory and writes the [`LOCK_FILE`] sentinel. If
    /// either step fails the store degrades to cache-disabled mode instead of
    /// returning an error.
    pub async fn open(config: CacheConfig) -> Self {
        if !config.enabled {
            info!("Disk cache disabled by configuration");
            return Self::disabled();
        }

        let root = config.root;
        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            warn!(
                root = %root.display(),
                "Couldn't create cache dir, running without disk cache: {}",
                e
            );
            return Self::disabled();
        }

        if let Err(e) = tokio::fs::write(root.join(LOCK_FILE), env!("CARGO_PKG_VERSION")).await {
            warn!(
                root = %root.display(),
                "Couldn't write to cache dir, running without disk cache: {}",
                e
            );
            return Self::disabled();
        }

        info!(root = %root.display(), "Disk cache enabled");
        Self::with_root(root)
    }

    /// A store in cache-disabled mode.
    pub fn disabled() -> Self {
        Self::default()
    }

    fn with_root(root: PathBuf) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    /// Whether the store persists anything.
    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Cache root, if enabled.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Read an artifact.
    ///
    /// Returns `None` on a miss, in disabled mode, for empty files and on any
    /// I/O fault.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let Some(root) = self.root.as_ref() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let path = root.join(key.as_path());
        match tokio::fs::read(&path).await {
            Ok(data) if !data.is_empty() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, bytes = data.len(), "HIT");
                Some(Bytes::from(data))
            }
            Ok(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Empty artifact treated as miss");
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "MISS");
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, "Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Write an artifact, publishing it atomically.
    ///
    /// Empty payloads are never stored. Writing the same payload again for a
    /// key is idempotent.
    pub async fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), StoreError> {
        let root = self.root.as_ref().ok_or(StoreError::Disabled)?;
        if data.is_empty() {
            return Ok(());
        }

        let path = root.join(key.as_path());
        match write_atomic(&path, data).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, bytes = data.len(), "CACHE.PUT");
                Ok(())
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Fire-and-forget [`put`](Self::put) on a background task.
    ///
    /// Failures are logged. Returns the task handle so callers that care
    /// (tests, mostly) can await completion; `None` when nothing is written.
    pub fn put_detached(self: &Arc<Self>, key: CacheKey, data: Bytes) -> Option<JoinHandle<()>> {
        if !self.is_enabled() || data.is_empty() {
            return None;
        }

        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            if let Err(e) = store.put(&key, &data).await {
                warn!(key = %key, "Error caching artifact: {}", e);
            }
        }))
    }

    /// Tee a byte stream into the store while passing it through unchanged.
    ///
    /// The artifact is published only if the stream ends without an error.
    /// If the stream fails, or is dropped before its end (client went away),
    /// the partial file is discarded. In disabled mode the stream is returned
    /// untouched.
    ///
    /// At most [`TEE_BUFFER`] chunks wait for the disk. When the writer falls
    /// further behind, caching is abandoned and the stream keeps flowing to
    /// the client.
    pub fn tee<S, E>(self: &Arc<Self>, key: CacheKey, body: S) -> BoxStream<'static, Result<Bytes, E>>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Send + 'static,
    {
        if !self.is_enabled() {
            return body.boxed();
        }

        let (tx, rx) = mpsc::channel(TEE_BUFFER);
        let store = Arc::clone(self);
        let abandoned = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move { store.drain_tee(key, rx).await });

        let finish_tx = tx.clone();
        let finish_abandoned = Arc::clone(&abandoned);
        let mut tx = Some(tx);
        let body = body.map(move |item| {
            if let Some(sender) = tx.take() {
                let event = match &item {
                    Ok(chunk) => TeeEvent::Chunk(chunk.clone()),
                    Err(_) => TeeEvent::Abort,
                };
                if sender.try_send(event).is_ok() {
                    tx = Some(sender);
                } else {
                    abandoned.store(true, Ordering::Relaxed);
                }
            }
            item
        });
        let finish = stream::once(async move {
            // A dropped sender without Finish makes the writer discard.
            if !finish_abandoned.load(Ordering::Relaxed) {
                let _ = finish_tx.send(TeeEvent::Finish).await;
            }
        })
        .filter_map(|()| futures::future::ready(None::<Result<Bytes, E>>));

        body.chain(finish).boxed()
    }

    /// Current activity counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    async fn drain_tee(&self, key: CacheKey, mut rx: mpsc::Receiver<TeeEvent>) {
        let Some(root) = self.root.as_ref() else {
            return;
        };
        let path = root.join(key.as_path());
        let tmp = temp_path(&path);

        let mut file = match create_file(&path, &tmp).await {
            Ok(file) => file,
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, "Error caching stream: {}", e);
                return;
            }
        };

        let mut written = 0usize;
        while let Some(event) = rx.recv().await {
            match event {
                TeeEvent::Chunk(chunk) => {
                    if let Err(e) = file.write_all(&chunk).await {
                        self.write_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %key, "Error caching stream: {}", e);
                        drop(file);
                        let _ = tokio::fs::remove_file(&tmp).await;
                        return;
                    }
                    written += chunk.len();
                }
                TeeEvent::Abort => break,
                TeeEvent::Finish => {
                    let flushed = file.flush().await;
                    drop(file);
                    if written == 0 {
                        let _ = tokio::fs::remove_file(&tmp).await;
                        return;
                    }
                    let published = match flushed {
                        Ok(()) => tokio::fs::rename(&tmp, &path).await,
                        Err(e) => Err(e),
                    };
                    match published {
                        Ok(()) => {
                            self.writes.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, bytes = written, "CACHE.PUT (stream)");
                        }
                        Err(e) => {
                            self.write_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(key = %key, "Error publishing cached stream: {}", e);
                            let _ = tokio::fs::remove_file(&tmp).await;
                        }
                    }
                    return;
                }
            }
        }

        // Aborted, or the stream was dropped before it finished.
        drop(file);
        let _ = tokio::fs::remove_file(&tmp).await;
        debug!(key = %key, "Discarded incomplete stream");
    }
}

enum TeeEvent {
    Chunk(Bytes),
    Abort,
    Finish,
}

// =============================================================================
// File helpers
// =============================================================================

fn temp_path(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{}.tmp", std::process::id(), seq));
    path.with_file_name(name)
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

async fn create_file(path: &Path, tmp: &Path) -> Result<tokio::fs::File, StoreError> {
    ensure_parent(path).await?;
    tokio::fs::File::create(tmp)
        .await
        .map_err(|e| io_error(tmp, e))
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    ensure_parent(path).await?;

    let tmp = temp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(path, e));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
