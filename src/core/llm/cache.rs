use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::warn;

/// Entries older than this are misses and are pruned at flush time.
pub const CACHE_TTL_SECS: u64 = 600;

/// Persisted shape. Older cache files stored bare response strings; those
/// still load but are classified as already expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Timestamped { response: String, timestamp: u64 },
    Legacy(String),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: String,
    timestamp: u64,
}

/// Process-wide memo of LLM responses keyed by the exact prompt text.
/// Shared across jobs: a hit for a prompt written by another job is
/// intended behavior.
pub struct ResponseCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl ResponseCache {
    /// Load the persisted cache. A missing, unreadable, or corrupt file is
    /// an empty cache, never an error.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, StoredEntry>>(&raw) {
                Ok(stored) => stored
                    .into_iter()
                    .map(|(key, entry)| {
                        let entry = match entry {
                            StoredEntry::Timestamped {
                                response,
                                timestamp,
                            } => CacheEntry {
                                response,
                                timestamp,
                            },
                            // Legacy entries carry no timestamp: expired on arrival.
                            StoredEntry::Legacy(response) => CacheEntry {
                                response,
                                timestamp: 0,
                            },
                        };
                        (key, entry)
                    })
                    .collect(),
                Err(e) => {
                    warn!("failed to parse cache file {}: {e}; starting empty", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("failed to read cache file {}: {e}; starting empty", path.display());
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Returns the cached response only while the entry is fresh. Absent
    /// and expired entries are both plain misses.
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| is_fresh(entry.timestamp, now_secs()))
            .map(|entry| entry.response.clone())
    }

    pub async fn put(&self, key: &str, response: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                response: response.to_string(),
                timestamp: now_secs(),
            },
        );
    }

    /// Persist to disk, pruning expired entries first so the file does not
    /// grow without bound. The lock is held across prune-and-write, so
    /// concurrent flushes serialize and cannot lose fresh entries.
    pub async fn flush(&self) -> std::io::Result<()> {
        let mut entries = self.entries.lock().await;
        let now = now_secs();
        entries.retain(|_, entry| is_fresh(entry.timestamp, now));

        let stored: BTreeMap<&String, StoredEntry> = entries
            .iter()
            .map(|(key, entry)| {
                (
                    key,
                    StoredEntry::Timestamped {
                        response: entry.response.clone(),
                        timestamp: entry.timestamp,
                    },
                )
            })
            .collect();

        let json = serde_json::to_string(&stored).map_err(std::io::Error::other)?;
        write_atomic(&self.path, json.as_bytes()).await
    }

    #[cfg(test)]
    async fn insert_at(&self, key: &str, response: &str, timestamp: u64) {
        self.entries.lock().await.insert(
            key.to_string(),
            CacheEntry {
                response: response.to_string(),
                timestamp,
            },
        );
    }
}

fn is_fresh(timestamp: u64, now: u64) -> bool {
    now.saturating_sub(timestamp) < CACHE_TTL_SECS
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Temp file + rename so a crashed flush never leaves a torn cache file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
