//! CLI command implementations

pub mod build;
pub mod cache;
pub mod images;
pub mod run;
pub mod variants;

pub use build::build;
pub use images::images;
pub use run::run;
pub use variants::{dockerfile, plan, variants};

use crate::VariantArgs;
use anyhow::Result;
use hatch_core::{Config, VariantSpec};

/// Resolves the variant from flags, falling back to the configured
/// database-client requirement.
pub(crate) fn resolve_variant(config: &Config, args: &VariantArgs) -> Result<VariantSpec> {
    let table = config.variant_table()?;
    let spec = match &args.variant {
        Some(name) => table.get(name)?,
        None => table.select(args.database_client || config.requires_database_client)?,
    };
    Ok(spec.clone())
}

/// Formats size in bytes to human-readable form.
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
