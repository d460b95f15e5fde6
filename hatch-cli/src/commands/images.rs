//! Images command implementation for the Hatch CLI.
//!
//! Lists the images in the local image store.

use super::format_size;
use anyhow::{Context, Result};
use colored::Colorize;
use hatch_core::ImageStore;
use tabled::{Table, Tabled};

/// Lists all built images.
pub fn images() -> Result<()> {
    let images = ImageStore::open_default().list().with_context(|| "Failed to list images")?;

    if images.is_empty() {
        println!("No images found.");
        println!();
        println!("Build your first image with: {}", "hatch build".cyan());
        return Ok(());
    }

    #[derive(Tabled)]
    struct ImageRow {
        #[tabled(rename = "VARIANT")]
        variant: String,
        #[tabled(rename = "IMAGE ID")]
        image_id: String,
        #[tabled(rename = "LAYERS")]
        layers: usize,
        #[tabled(rename = "SIZE")]
        size: String,
        #[tabled(rename = "CREATED")]
        created: String,
    }

    let rows: Vec<ImageRow> = images
        .iter()
        .map(|img| ImageRow {
            variant: img.variant.clone(),
            image_id: img.short_id().to_string(),
            layers: img.layers.len(),
            size: format_size(img.size_bytes()),
            created: format_created(&img.created),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

/// Formats an RFC 3339 creation time relative to now.
fn format_created(created: &str) -> String {
    let Ok(created_at) = chrono::DateTime::parse_from_rfc3339(created) else {
        return created.to_string();
    };
    let secs = (chrono::Utc::now() - created_at.with_timezone(&chrono::Utc)).num_seconds().max(0);

    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else if secs < 604800 {
        format!("{} days ago", secs / 86400)
    } else {
        format!("{} weeks ago", secs / 604800)
    }
}
