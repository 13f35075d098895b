//! Result cache keyed by content fingerprint.
//!
//! Two stores implement [`ResultCache`]:
//!
//! * [`MemoryCache`]: bounded LRU split into independently locked shards, so
//!   writes for different fingerprints rarely contend.
//! * [`DirectoryCache`]: one JSON file per entry, written via temp file and
//!   rename so readers never see a half-written entry. Holds at most
//!   `capacity` entries; the oldest files go first.
//!
//! Entries hold cleaned pages, not assembled text: the page separator is
//! applied on every hit, so one entry serves any separator.
//!
//! The engine only writes an entry after every page of a job succeeded.
//! Store failures are reported as [`CacheError`]; the engine logs them and
//! carries on (read error = miss, write error = skipped).

use crate::config::{CacheConfig, OutputFormat};
use crate::error::CacheError;
use crate::fingerprint::CacheKey;
use crate::output::PageText;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const SHARDS: usize = 16;

/// What the cache stores for a fully successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub format: OutputFormat,
    pub prompt: String,
    /// Model identifier that produced the text.
    pub model: String,
    pub pages: Vec<PageText>,
    pub created_at: DateTime<Utc>,
}

impl CachedDocument {
    fn is_expired(&self, ttl: Option<chrono::Duration>) -> bool {
        match ttl {
            Some(ttl) => Utc::now() - self.created_at > ttl,
            None => false,
        }
    }
}

/// A store for assembled documents.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Pure lookup; `Ok(None)` on miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedDocument>, CacheError>;

    async fn put(&self, key: &CacheKey, doc: CachedDocument) -> Result<(), CacheError>;
}

/// Build the store described by `config`, or `None` when caching is off.
pub fn from_config(config: &CacheConfig) -> Option<Arc<dyn ResultCache>> {
    if !config.enabled {
        return None;
    }
    let ttl = config.ttl_secs;
    Some(match &config.directory {
        Some(dir) => Arc::new(DirectoryCache::new(dir.clone(), config.capacity, ttl)),
        None => Arc::new(MemoryCache::new(config.capacity, ttl)),
    })
}

fn ttl_from_secs(secs: Option<u64>) -> Option<chrono::Duration> {
    secs.and_then(|s| chrono::Duration::try_seconds(s as i64))
}

// ── Memory ───────────────────────────────────────────────────────────────

/// Sharded in-memory LRU.
pub struct MemoryCache {
    shards: Vec<Mutex<LruCache<CacheKey, CachedDocument>>>,
    ttl: Option<chrono::Duration>,
}

impl MemoryCache {
    /// `capacity` is the total entry budget across shards (minimum 1).
    pub fn new(capacity: usize, ttl_secs: Option<u64>) -> Self {
        let capacity = capacity.max(1);
        let shard_count = capacity.min(SHARDS);
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self {
            shards,
            ttl: ttl_from_secs(ttl_secs),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, CachedDocument>> {
        let mut hasher = DefaultHasher::new();
        key.fingerprint.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Entries currently held across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedDocument>, CacheError> {
        let mut shard = self.shard(key).lock();
        match shard.get(key) {
            Some(doc) if !doc.is_expired(self.ttl) => Ok(Some(doc.clone())),
            Some(_) => {
                debug!("Cache entry {} expired", key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, doc: CachedDocument) -> Result<(), CacheError> {
        self.shard(key).lock().put(key.clone(), doc);
        Ok(())
    }
}

// ── Directory ────────────────────────────────────────────────────────────

/// One JSON file per entry under a directory.
pub struct DirectoryCache {
    dir: PathBuf,
    capacity: usize,
    ttl: Option<chrono::Duration>,
}

impl DirectoryCache {
    /// `capacity` is the maximum number of entry files kept (minimum 1).
    pub fn new(dir: impl Into<PathBuf>, capacity: usize, ttl_secs: Option<u64>) -> Self {
        Self {
            dir: dir.into(),
            capacity: capacity.max(1),
            ttl: ttl_from_secs(ttl_secs),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_file_stem()))
    }

    /// Entry files currently on disk.
    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries().await?.len())
    }

    /// Entry files with their modification times.
    async fn entries(&self) -> Result<Vec<(std::time::SystemTime, PathBuf)>, CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(io_err(e)),
        };
        while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            out.push((modified, path));
        }
        Ok(out)
    }

    /// Delete the oldest entries other than `keep` until at most `capacity`
    /// remain.
    async fn evict_over_capacity(&self, keep: &Path) -> Result<(), CacheError> {
        let mut entries = self.entries().await?;
        entries.retain(|(_, path)| path != keep);
        if entries.len() < self.capacity {
            return Ok(());
        }
        entries.sort();
        let excess = entries.len() + 1 - self.capacity;
        for (_, path) in entries.into_iter().take(excess) {
            debug!("Evicting cache file {}", path.display());
            remove_quietly(&path).await;
        }
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove cache file {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl ResultCache for DirectoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedDocument>, CacheError> {
        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        let doc: CachedDocument =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        if doc.is_expired(self.ttl) {
            debug!("Cache entry {} expired; removing", key);
            remove_quietly(&path).await;
            return Ok(None);
        }
        Ok(Some(doc))
    }

    async fn put(&self, key: &CacheKey, doc: CachedDocument) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: e,
            })?;

        let json = serde_json::to_vec(&doc).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            detail: e.to_string(),
        })?;

        let path = self.entry_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key.as_file_stem(), uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| CacheError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
        self.evict_over_capacity(&path).await
    }
}
