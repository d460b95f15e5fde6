//! Layer cache.
//!
//! Stores layer blobs next to JSON metadata, keyed by the chained cache key of
//! the step that produced them. Eviction is least-recently-used once the total
//! blob size goes over the configured limit.

use crate::paths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Default cache size limit: 5GB
pub const DEFAULT_CACHE_SIZE_LIMIT: u64 = 5 * 1024 * 1024 * 1024;

const BLOB_EXT: &str = "blob";
const META_EXT: &str = "json";

/// Cached layers on disk.
#[derive(Debug)]
pub struct LayerCache {
    cache_dir: PathBuf,
    size_limit: u64,
}

/// Metadata for a cached layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub cache_key: String,
    /// SHA256 of the blob contents
    pub digest: String,
    pub size_bytes: u64,
    pub created_at: u64,
    /// Used for LRU eviction
    pub last_accessed: u64,
    /// Human-readable step, for `hatch cache stats` and logs
    pub step_description: String,
}

/// Result of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    Hit { blob_path: PathBuf, metadata: LayerMetadata },
    Miss,
}

/// Aggregate numbers for the cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub layers: usize,
    pub total_bytes: u64,
    pub size_limit: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to serialize/deserialize metadata: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Cache directory not accessible: {0}")]
    CacheDirectoryError(String),
}

impl LayerCache {
    /// Opens the cache at the default location (`<data_dir>/cache/layers`).
    pub fn open_default(size_limit: u64) -> Result<Self, CacheError> {
        Self::with_config(paths::layer_cache_dir(), size_limit)
    }

    /// Opens a cache rooted at `cache_dir`, creating it if needed.
    pub fn with_config(cache_dir: PathBuf, size_limit: u64) -> Result<Self, CacheError> {
        fs::create_dir_all(&cache_dir).map_err(|e| {
            CacheError::CacheDirectoryError(format!("Failed to create {}: {}", cache_dir.display(), e))
        })?;

        Ok(Self { cache_dir, size_limit })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Looks up a layer and bumps its access time on a hit.
    pub fn lookup(&mut self, cache_key: &str) -> Result<CacheLookup, CacheError> {
        Self::validate_key(cache_key)?;
        let blob_path = self.blob_path(cache_key);

        if !blob_path.exists() || !self.metadata_path(cache_key).exists() {
            debug!(cache_key, "Layer cache miss");
            return Ok(CacheLookup::Miss);
        }

        let mut metadata = self.load_metadata(cache_key)?;
        metadata.last_accessed = Self::current_timestamp();
        if let Err(e) = self.save_metadata(&metadata) {
            warn!(cache_key, error = %e, "Failed to record layer access time");
        }

        debug!(cache_key, step = %metadata.step_description, "Layer cache hit");
        Ok(CacheLookup::Hit { blob_path, metadata })
    }

    /// Stores a layer blob and returns its metadata.
    pub fn insert(
        &mut self,
        cache_key: &str,
        blob: &[u8],
        digest: &str,
        step_description: String,
    ) -> Result<LayerMetadata, CacheError> {
        Self::validate_key(cache_key)?;

        fs::write(self.blob_path(cache_key), blob)?;

        let now = Self::current_timestamp();
        let metadata = LayerMetadata {
            cache_key: cache_key.to_string(),
            digest: digest.to_string(),
            size_bytes: blob.len() as u64,
            created_at: now,
            last_accessed: now,
            step_description,
        };
        self.save_metadata(&metadata)?;

        info!(cache_key, size_bytes = metadata.size_bytes, "Cached layer");

        self.evict_if_needed()?;
        Ok(metadata)
    }

    pub fn remove(&self, cache_key: &str) -> Result<(), CacheError> {
        for path in [self.blob_path(cache_key), self.metadata_path(cache_key)] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        debug!(cache_key, "Removed layer from cache");
        Ok(())
    }

    /// Removes every cached layer.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.files_with_ext(BLOB_EXT)? {
            fs::remove_file(&path)?;
            removed += 1;
        }
        for path in self.files_with_ext(META_EXT)? {
            fs::remove_file(path)?;
        }
        info!(removed, "Cleared layer cache");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let blobs = self.files_with_ext(BLOB_EXT)?;
        let mut total_bytes = 0;
        for blob in &blobs {
            total_bytes += fs::metadata(blob)?.len();
        }
        Ok(CacheStats { layers: blobs.len(), total_bytes, size_limit: self.size_limit })
    }

    fn evict_if_needed(&mut self) -> Result<(), CacheError> {
        let mut current = self.stats()?.total_bytes;
        if current <= self.size_limit {
            return Ok(());
        }

        warn!(current, limit = self.size_limit, "Layer cache over limit, evicting");

        let mut layers: Vec<LayerMetadata> = Vec::new();
        for path in self.files_with_ext(META_EXT)? {
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("layer-"))
                .map(str::to_string);
            if let Some(key) = key {
                if let Ok(metadata) = self.load_metadata(&key) {
                    layers.push(metadata);
                }
            }
        }
        layers.sort_by_key(|m| (m.last_accessed, m.created_at));

        for layer in layers {
            if current <= self.size_limit {
                break;
            }
            info!(cache_key = %layer.cache_key, size_bytes = layer.size_bytes, "Evicting layer");
            self.remove(&layer.cache_key)?;
            current = current.saturating_sub(layer.size_bytes);
        }

        Ok(())
    }

    fn files_with_ext(&self, ext: &str) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == ext) {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn validate_key(cache_key: &str) -> Result<(), CacheError> {
        if cache_key.is_empty() || !cache_key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CacheError::InvalidKey(cache_key.to_string()));
        }
        Ok(())
    }

    fn blob_path(&self, cache_key: &str) -> PathBuf {
        self.cache_dir.join(format!("layer-{}.{}", cache_key, BLOB_EXT))
    }

    fn metadata_path(&self, cache_key: &str) -> PathBuf {
        self.cache_dir.join(format!("layer-{}.{}", cache_key, META_EXT))
    }

    fn load_metadata(&self, cache_key: &str) -> Result<LayerMetadata, CacheError> {
        let contents = fs::read_to_string(self.metadata_path(cache_key))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes metadata to a temp file and renames it into place. Readers see
    /// either the old entry or the new one, never a partial write.
    fn save_metadata(&self, metadata: &LayerMetadata) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(metadata)?;
        let tmp = self
            .cache_dir
            .join(format!(".layer-{}.{}.tmp", metadata.cache_key, uuid::Uuid::new_v4()));
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, self.metadata_path(&metadata.cache_key)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn current_timestamp() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(limit: u64) -> (TempDir, LayerCache) {
        let dir = TempDir::new().unwrap();
        let cache = LayerCache::with_config(dir.path().join("layers"), limit).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_cache_miss() {
        let (_dir, mut cache) = cache(1024 * 1024);
        assert!(matches!(cache.lookup("abc123def456").unwrap(), CacheLookup::Miss));
    }

    #[test]
    fn test_cache_hit() {
        let (_dir, mut cache) = cache(1024 * 1024);
        cache.insert("abc123", b"layer data", "d1", "RUN pip install".into()).unwrap();

        match cache.lookup("abc123").unwrap() {
            CacheLookup::Hit { blob_path, metadata } => {
                assert_eq!(metadata.size_bytes, 10);
                assert_eq!(metadata.digest, "d1");
                assert_eq!(fs::read(blob_path).unwrap(), b"layer data");
            }
            CacheLookup::Miss => panic!("Expected cache hit"),
        }
    }

    #[test]
    fn test_invalid_cache_key() {
        let (_dir, mut cache) = cache(1024 * 1024);
        assert!(matches!(
            cache.insert("not a key!", b"data", "d", "x".into()),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(cache.lookup("../etc"), Err(CacheError::InvalidKey(_))));
    }

    #[test]
    fn test_lru_eviction() {
        let (_dir, mut cache) = cache(2048);

        cache.insert("aaa111", &[0u8; 1024], "d", "l1".into()).unwrap();
        cache.insert("bbb222", &[0u8; 1024], "d", "l2".into()).unwrap();
        // Make aaa111 the oldest regardless of timestamp resolution.
        let mut meta = cache.load_metadata("aaa111").unwrap();
        meta.last_accessed = 0;
        cache.save_metadata(&meta).unwrap();

        cache.insert("ccc333", &[0u8; 1024], "d", "l3".into()).unwrap();

        let stats = cache.stats().unwrap();
        assert!(stats.total_bytes <= 2048);
        assert_eq!(stats.layers, 2);
        assert!(matches!(cache.lookup("aaa111").unwrap(), CacheLookup::Miss));
        assert!(matches!(cache.lookup("ccc333").unwrap(), CacheLookup::Hit { .. }));
    }

    #[test]
    fn test_truncated_metadata_is_an_error_not_a_hit() {
        let (_dir, mut cache) = cache(1024 * 1024);
        cache.insert("abc123", b"layer data", "d1", "l1".into()).unwrap();
        fs::write(cache.metadata_path("abc123"), "{\"cache_key\": \"abc").unwrap();

        assert!(matches!(cache.lookup("abc123"), Err(CacheError::Serialization(_))));
        cache.remove("abc123").unwrap();
        assert!(matches!(cache.lookup("abc123").unwrap(), CacheLookup::Miss));
    }

    #[test]
    fn test_metadata_writes_leave_no_temp_files() {
        let (_dir, mut cache) = cache(1024 * 1024);
        cache.insert("abc123", b"layer data", "d1", "l1".into()).unwrap();
        cache.lookup("abc123").unwrap();

        let names: Vec<String> = fs::read_dir(cache.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2, "unexpected files: {:?}", names);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[test]
    fn test_clear_and_stats() {
        let (_dir, mut cache) = cache(1024 * 1024);
        cache.insert("aaa111", b"12345", "d", "l1".into()).unwrap();
        cache.insert("bbb222", b"123", "d", "l2".into()).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.layers, 2);
        assert_eq!(stats.total_bytes, 8);

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.stats().unwrap().layers, 0);
        assert_eq!(fs::read_dir(cache.dir()).unwrap().count(), 0);
    }
}
