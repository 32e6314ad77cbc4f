//! Persistent key cache backed by a JSON file.
//!
//! A [`KeyCache`] maps a lookup key (an entity name, a query) to the value a
//! previous run resolved for it, so expensive or flaky lookups happen once.
//!
//! **Lifecycle:**
//! - loaded once in [`KeyCache::open`]; a missing file is an empty cache, a corrupt one
//!   is logged and replaced by an empty cache
//! - every [`KeyCache::put`] rewrites the whole file with keys sorted, inside the
//!   same critical section as the in-memory update
//! - entries are never evicted

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use factfinder_shared::{FactFinderError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Secondary payload stored next to a resolved value (e.g. the report year).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Secondary {
    Int(i64),
    Text(String),
}

/// One resolved lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Secondary>,
}

impl CacheEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Secondary) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn secondary_int(&self) -> Option<i64> {
        match self.secondary {
            Some(Secondary::Int(n)) => Some(n),
            Some(Secondary::Text(ref s)) => s.parse().ok(),
            None => None,
        }
    }
}

/// Durable key → value map. Cheap to share behind an `Arc`.
pub struct KeyCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl KeyCache {
    /// Load the cache stored at `path`. Never fails: unreadable storage starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => {
                tracing::debug!(path = %path.display(), entries = entries.len(), "cache loaded");
                entries
            }
            Err(e) => {
                tracing::warn!(error = %e, "starting with an empty cache");
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Overwrite `key` and flush the full map to disk.
    ///
    /// The in-memory update stands even if the flush fails; the error is
    /// returned so the caller can log it.
    pub async fn put(&self, key: impl Into<String>, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.into(), entry);
        persist(&self.path, &entries).await
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, CacheEntry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(FactFinderError::CacheCorrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    serde_json::from_str(&content).map_err(|e| FactFinderError::CacheCorrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write to a sibling temp file, then rename over the target.
async fn persist(path: &Path, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FactFinderError::io(parent, e))?;
    }

    // BTreeMap serializes in key order.
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| FactFinderError::validation(format!("cache serialization failed: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| FactFinderError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| FactFinderError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use uuid::Uuid;

    fn temp_cache_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("ff-cache-test-{}", Uuid::now_v7()))
            .join("tickers.json")
    }

    #[tokio::test]
    async fn put_then_get_returns_value() {
        let path = temp_cache_path();
        let cache = KeyCache::open(&path);
        assert!(cache.get("ACME").await.is_none());

        cache.put("ACME", CacheEntry::new("ACM")).await.unwrap();
        assert_eq!(cache.get("ACME").await, Some(CacheEntry::new("ACM")));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let path = temp_cache_path();
        {
            let cache = KeyCache::open(&path);
            cache
                .put(
                    "ACME",
                    CacheEntry::new("https://acme.example/ar-2024.pdf")
                        .with_secondary(Secondary::Int(2024)),
                )
                .await
                .unwrap();
        }

        let reopened = KeyCache::open(&path);
        let entry = reopened.get("ACME").await.expect("entry persisted");
        assert_eq!(entry.value, "https://acme.example/ar-2024.pdf");
        assert_eq!(entry.secondary_int(), Some(2024));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn persisted_keys_are_sorted() {
        let path = temp_cache_path();
        let cache = KeyCache::open(&path);
        for key in ["zeta", "alpha", "mike"] {
            cache.put(key, CacheEntry::new(key.to_uppercase())).await.unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let alpha = raw.find("\"alpha\"").unwrap();
        let mike = raw.find("\"mike\"").unwrap();
        let zeta = raw.find("\"zeta\"").unwrap();
        assert!(alpha < mike && mike < zeta);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let path = temp_cache_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let cache = KeyCache::open(&path);
        assert!(cache.is_empty().await);

        // A put repairs the file.
        cache.put("ACME", CacheEntry::new("ACM")).await.unwrap();
        assert_eq!(KeyCache::open(&path).len().await, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn concurrent_puts_all_land() {
        let path = temp_cache_path();
        let cache = Arc::new(KeyCache::open(&path));

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.put(format!("key-{i:02}"), CacheEntry::new(i.to_string())).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = KeyCache::open(&path);
        assert_eq!(reopened.len().await, 16);
        assert_eq!(reopened.get("key-07").await, Some(CacheEntry::new("7")));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
