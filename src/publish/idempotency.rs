//! Idempotency cache for publish attempt sequences.
//!
//! One entry per article, tagged with the idempotency key of its current
//! sequence. Media uploaded during the sequence is recorded here so a retry
//! (or a restarted process, when a snapshot file is configured) reuses it
//! instead of uploading again. Entries are evicted on success, on permanent
//! failure and after the TTL.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::publish::cms::UploadedMedia;

/// What one publish sequence has done so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub article_id: String,
    pub key: String,
    /// Image id → CMS media.
    pub uploaded: BTreeMap<String, UploadedMedia>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    fn new(article_id: &str, key: &str) -> Self {
        Self {
            article_id: article_id.to_string(),
            key: key.to_string(),
            uploaded: BTreeMap::new(),
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
        self.created_at
            .checked_add_signed(ttl)
            .is_some_and(|expires| expires <= now)
    }
}

pub struct IdempotencyCache {
    entries: RwLock<HashMap<String, IdempotencyEntry>>,
    ttl: TimeDelta,
    path: Option<PathBuf>,
    /// Serializes snapshot writes so the file always holds the latest state.
    io: Mutex<()>,
}

impl IdempotencyCache {
    /// In-memory cache.
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self::build(ttl, None, HashMap::new()))
    }

    /// Cache backed by a JSON snapshot at `path`. Unexpired entries from a
    /// previous process are loaded; a missing file starts empty.
    pub async fn with_snapshot(ttl: Duration, path: PathBuf) -> std::io::Result<Arc<Self>> {
        let mut entries = HashMap::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let loaded: Vec<IdempotencyEntry> = serde_json::from_slice(&bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                for entry in loaded {
                    entries.insert(entry.article_id.clone(), entry);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let cache = Self::build(ttl, Some(path), entries);
        let expired = cache.evict_expired().await;
        info!(
            entries = cache.len().await,
            expired,
            "Loaded idempotency snapshot"
        );
        Ok(Arc::new(cache))
    }

    fn build(ttl: Duration, path: Option<PathBuf>, entries: HashMap<String, IdempotencyEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            path,
            io: Mutex::new(()),
        }
    }

    /// The live entry for `article_id`, if unexpired.
    pub async fn get(&self, article_id: &str) -> Option<IdempotencyEntry> {
        let entries = self.entries.read().await;
        entries
            .get(article_id)
            .filter(|e| !e.is_expired(self.ttl, Utc::now()))
            .cloned()
    }

    /// Start or resume the sequence for `key`.
    ///
    /// An entry for a different key, or an expired one, is replaced.
    pub async fn begin(&self, article_id: &str, key: &str) -> IdempotencyEntry {
        let entry = {
            let mut entries = self.entries.write().await;
            let now = Utc::now();
            let stale = entries
                .get(article_id)
                .is_none_or(|e| e.key != key || e.is_expired(self.ttl, now));
            if stale {
                debug!(article_id, idempotency_key = key, "Starting publish sequence");
                entries.insert(article_id.to_string(), IdempotencyEntry::new(article_id, key));
            } else {
                debug!(article_id, idempotency_key = key, "Resuming publish sequence");
            }
            entries
                .get(article_id)
                .cloned()
                .unwrap_or_else(|| IdempotencyEntry::new(article_id, key))
        };
        self.persist().await;
        entry
    }

    /// Bump the attempt counter; returns the new count.
    pub async fn record_attempt(&self, article_id: &str) -> u32 {
        let attempts = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(article_id) {
                Some(entry) => {
                    entry.attempts += 1;
                    entry.attempts
                }
                None => 0,
            }
        };
        self.persist().await;
        attempts
    }

    /// Remember that `image_id` is already in the CMS.
    pub async fn record_upload(&self, article_id: &str, image_id: &str, media: UploadedMedia) {
        {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(article_id) else {
                warn!(article_id, image_id, "Upload recorded without an open sequence");
                return;
            };
            entry.uploaded.insert(image_id.to_string(), media);
        }
        self.persist().await;
    }

    pub async fn evict(&self, article_id: &str) {
        let removed = self.entries.write().await.remove(article_id).is_some();
        if removed {
            debug!(article_id, "Evicted idempotency entry");
            self.persist().await;
        }
    }

    /// Drop expired entries; returns how many went.
    pub async fn evict_expired(&self) -> usize {
        let removed = {
            let mut entries = self.entries.write().await;
            let now = Utc::now();
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(self.ttl, now));
            before - entries.len()
        };
        if removed > 0 {
            info!(removed, "Evicted expired idempotency entries");
            self.persist().await;
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Write the snapshot via a temp file and rename. Failures are logged;
    /// the in-memory state stays authoritative for this process.
    async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.io.lock().await;

        let json = {
            let entries = self.entries.read().await;
            let mut list: Vec<&IdempotencyEntry> = entries.values().collect();
            list.sort_by(|a, b| a.article_id.cmp(&b.article_id));
            serde_json::to_vec_pretty(&list)
        };
        let json = match json {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize idempotency snapshot");
                return;
            }
        };

        let tmp = path.with_extension("tmp");
        let result = async {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, &json).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write idempotency snapshot");
        }
    }
}

/// Spawn a background task that evicts expired entries every `period`.
pub fn spawn_eviction_task(
    cache: Arc<IdempotencyCache>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            cache.evict_expired().await;
        }
    })
}
