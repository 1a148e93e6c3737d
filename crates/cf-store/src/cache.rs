//! Key/value cache boundary for the published snapshot.
//!
//! - [`MemoryCache`] — in-process map, expiry checked on read
//! - [`FileCache`] — one JSON file per key, written atomically via rename

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use anyhow::{Context, Result};
use cf_core::config::{CacheBackend, CacheConfig};
use cf_core::error::CfError;
use cf_core::time_util::now_ms;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xxhash_rust::xxh64::xxh64;

pub trait Cache: Send + Sync {
    /// Stored value for `key`, `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`, replacing any previous value.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Build the cache backend selected in config.
pub fn build_cache(config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    match config.backend {
        CacheBackend::Memory => {
            info!("[cache] using in-memory cache");
            Ok(Arc::new(MemoryCache::new()))
        }
        CacheBackend::File => {
            let dir = config
                .dir
                .as_deref()
                .ok_or_else(|| CfError::Config("cache.dir is required for the file backend".into()))?;
            info!("[cache] using file cache at {dir}");
            Ok(Arc::new(FileCache::new(dir)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<AHashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| CfError::Cache("memory cache lock poisoned".into()))?;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| CfError::Cache("memory cache lock poisoned".into()))?;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct FileEntry {
    key: String,
    expires_at_ms: i64,
    value: String,
}

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:016x}.json", xxh64(key.as_bytes(), 0)))
    }
}

impl Cache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CfError::Cache(format!("read {}: {e}", path.display())).into()),
        };
        let entry: FileEntry =
            serde_json::from_str(&raw).map_err(|e| CfError::Cache(format!("corrupt entry {}: {e}", path.display())))?;

        if entry.key != key {
            return Ok(None);
        }
        if now_ms() >= entry.expires_at_ms {
            debug!("[cache] entry {key} expired");
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("[cache] failed to remove expired {}: {e}", path.display()),
            }
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = FileEntry {
            key: key.to_string(),
            expires_at_ms: now_ms().saturating_add(ttl_ms),
            value: value.to_string(),
        };
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec(&entry)?;
        fs::write(&tmp, body).map_err(|e| CfError::Cache(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path).map_err(|e| CfError::Cache(format!("rename into {}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_set_get_and_overwrite() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").unwrap(), None);
        cache.set("k", "v1", Duration::from_secs(60)).unwrap();
        cache.set("k", "v2", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn memory_entry_expires() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::ZERO).unwrap();
        assert!(cache.path_for("k").exists());
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(!cache.path_for("k").exists(), "expired entry left on disk");
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn file_set_get_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.set("csgonet_cases", "{\"a\":1}", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("csgonet_cases").unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(cache.get("other").unwrap(), None);

        let reopened = FileCache::new(dir.path()).unwrap();
        assert_eq!(reopened.get("csgonet_cases").unwrap().as_deref(), Some("{\"a\":1}"));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn file_entry_expires() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.set("k", "v", Duration::ZERO).unwrap();
        assert!(cache.path_for("k").exists());
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(!cache.path_for("k").exists(), "expired entry left on disk");
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_a_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        fs::write(cache.path_for("k"), "not json").unwrap();
        let err = cache.get("k").unwrap_err();
        assert!(matches!(err.downcast_ref::<CfError>(), Some(CfError::Cache(_))));
    }

    #[test]
    fn build_cache_requires_dir_for_file_backend() {
        let config = CacheConfig { backend: CacheBackend::File, ..Default::default() };
        assert!(build_cache(&config).is_err());
        assert!(build_cache(&CacheConfig::default()).is_ok());
    }
}
