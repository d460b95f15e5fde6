//! `hatch cache` commands.

use super::format_size;
use anyhow::{Context, Result};
use colored::Colorize;
use hatch_core::{Config, LayerCache};

/// Shows layer cache usage.
pub fn stats(config: &Config) -> Result<()> {
    let cache = LayerCache::open_default(config.cache_size_limit_bytes)
        .with_context(|| "Failed to open layer cache")?;
    let stats = cache.stats()?;

    let used = if stats.size_limit == 0 {
        0.0
    } else {
        stats.total_bytes as f64 / stats.size_limit as f64 * 100.0
    };

    println!("Cache directory: {}", cache.dir().display().to_string().yellow());
    println!("Layers:          {}", stats.layers);
    println!(
        "Size:            {} / {} ({:.1}%)",
        format_size(stats.total_bytes),
        format_size(stats.size_limit),
        used
    );
    Ok(())
}

/// Removes every cached layer.
pub fn clear(config: &Config) -> Result<()> {
    let cache = LayerCache::open_default(config.cache_size_limit_bytes)
        .with_context(|| "Failed to open layer cache")?;
    let removed = cache.clear()?;

    if removed == 0 {
        println!("Cache is already empty");
    } else {
        println!("{} {} cached layer(s)", "Removed".green(), removed);
    }
    Ok(())
}
