//! Content-addressed verdict cache.
//!
//! One verdict per content digest, persisted as a single JSON document and
//! rewritten atomically (write-temp-then-rename). `get_or_compute` holds a
//! per-key async lock across lookup-miss → compute → durable store, so
//! concurrent uploads of the same bytes coalesce onto one computation and
//! identical uploads always return the stored verdict.
//!
//! Failure posture: unreadable or corrupt persisted state degrades to an
//! empty cache (warned, never fatal); a verdict that computed but failed to
//! persist is still returned to the caller with the write failure logged.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::content_key::ContentKey;
use crate::verdict::Verdict;

/// Name of the persisted cache document inside the cache directory.
pub const CACHE_FILE_NAME: &str = "prediction_cache.json";

/// One cached verdict. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: Verdict,
    /// ISO-8601 creation time.
    pub timestamp: String,
}

/// Errors from cache persistence. Callers of `get_or_compute` never see
/// these — they are logged and the computed verdict is returned regardless.
#[derive(Debug, thiserror::Error)]
pub enum CacheIoError {
    #[error("Cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache atomic rename failed: {0}")]
    Persist(String),
}

// ═══════════════════════════════════════════════════════════
// VerdictCache
// ═══════════════════════════════════════════════════════════

/// Persistent verdict cache keyed by content digest.
pub struct VerdictCache {
    cache_file: PathBuf,
    entries: Mutex<HashMap<ContentKey, CacheEntry>>,
    /// Per-key computation locks — the at-most-one-computation guarantee.
    key_locks: std::sync::Mutex<HashMap<ContentKey, Arc<Mutex<()>>>>,
}

impl VerdictCache {
    /// Open (or create) the cache persisted under `dir`.
    ///
    /// Corrupt or unreadable state is treated as an empty cache and logged
    /// as a recoverable warning — startup never fails here.
    pub fn open(dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Could not create cache directory");
        }
        let cache_file = dir.join(CACHE_FILE_NAME);

        let entries = match std::fs::read_to_string(&cache_file) {
            Ok(text) => match serde_json::from_str::<HashMap<ContentKey, CacheEntry>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        path = %cache_file.display(),
                        error = %e,
                        "Corrupt verdict cache, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(
                    path = %cache_file.display(),
                    error = %e,
                    "Unreadable verdict cache, starting empty"
                );
                HashMap::new()
            }
        };

        info!(entries = entries.len(), "Verdict cache initialized");

        Self {
            cache_file,
            entries: Mutex::new(entries),
            key_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Look up a stored verdict.
    pub async fn get(&self, key: &ContentKey) -> Option<Verdict> {
        self.entries.lock().await.get(key).map(|e| e.result.clone())
    }

    /// Return the stored verdict for `key`, computing and durably storing
    /// it first on a miss.
    ///
    /// Atomic per key: concurrent callers with the same key coalesce behind
    /// one lock, `compute` runs at most once, and every caller receives the
    /// identical stored verdict. A failed `compute` stores nothing, so a
    /// later call retries.
    pub async fn get_or_compute<E, F, Fut>(&self, key: &ContentKey, compute: F) -> Result<Verdict, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Verdict, E>>,
    {
        let key_lock = self.key_lock(key);
        let _guard = key_lock.lock().await;

        if let Some(entry) = self.entries.lock().await.get(key) {
            debug!(key = %key.short(), "Cache hit");
            return Ok(entry.result.clone());
        }
        debug!(key = %key.short(), "Cache miss, computing verdict");

        let verdict = compute().await?;

        let mut entries = self.entries.lock().await;
        entries.insert(
            *key,
            CacheEntry {
                result: verdict.clone(),
                timestamp: Utc::now().to_rfc3339(),
            },
        );
        if let Err(e) = self.persist(&entries) {
            // The caller still gets their verdict; only durability suffered.
            error!(key = %key.short(), error = %e, "Verdict computed but cache write failed");
        } else {
            debug!(key = %key.short(), "Verdict stored");
        }

        Ok(verdict)
    }

    /// Remove every entry and persist the empty document.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        if let Err(e) = self.persist(&entries) {
            error!(error = %e, "Failed to persist cleared cache");
        }
        info!("Verdict cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// The shared per-key lock, created on first use.
    fn key_lock(&self, key: &ContentKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(*key).or_default().clone()
    }

    /// Write the full document atomically: temp file in the same directory,
    /// fsync, then rename over the live file.
    fn persist(&self, entries: &HashMap<ContentKey, CacheEntry>) -> Result<(), CacheIoError> {
        let dir = self
            .cache_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let json = serde_json::to_string_pretty(entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.cache_file)
            .map_err(|e| CacheIoError::Persist(e.to_string()))?;
        Ok(())
    }
}
