//! Centralized path configuration for hatch.
//!
//! All data paths should go through this module so the CLI, the image store and
//! the layer cache agree on where things live.

use std::path::PathBuf;

/// Get the hatch data directory.
///
/// Resolution order:
/// 1. `HATCH_DATA_DIR` environment variable
/// 2. `~/.hatch` for user installs
/// 3. `./.hatch` when no home directory can be determined
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HATCH_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir().map(|h| h.join(".hatch")).unwrap_or_else(|| PathBuf::from(".hatch"))
}

/// Get the configuration directory.
///
/// `HATCH_CONFIG_DIR` wins, otherwise the data directory is used.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HATCH_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    data_dir()
}

/// Get the images directory (one JSON artifact per variant).
pub fn images_dir() -> PathBuf {
    data_dir().join("images")
}

/// Get the cache directory.
pub fn cache_dir() -> PathBuf {
    data_dir().join("cache")
}

/// Get the layer cache directory.
pub fn layer_cache_dir() -> PathBuf {
    cache_dir().join("layers")
}
