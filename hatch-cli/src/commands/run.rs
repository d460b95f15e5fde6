//! Run command implementation for the Hatch CLI.
//!
//! Runs a built image's service under the hot-reload supervisor.

use super::build::build_image;
use super::resolve_variant;
use crate::VariantArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use hatch_core::supervisor::{run_with_reload, shutdown_signal};
use hatch_core::{Config, ImageStore};
use std::path::Path;

/// Runs the service and returns its exit code.
///
/// Unless `no_build` is set the image is rebuilt first; unchanged layers come
/// from the cache. An empty `command` runs the image entrypoint.
pub async fn run(
    config: &Config,
    context_path: &Path,
    args: &VariantArgs,
    no_build: bool,
    command: Vec<String>,
) -> Result<i32> {
    let artifact = if no_build {
        let spec = resolve_variant(config, args)?;
        ImageStore::open_default()
            .load(&spec.name)
            .with_context(|| format!("No image for variant '{}', run `hatch build` first", spec.name))?
    } else {
        build_image(config, context_path, args, false)?
    };

    let command = if command.is_empty() { artifact.entrypoint.clone() } else { command };

    println!();
    println!(
        "{} Running {} ({}) on port {}",
        "»".bold().blue(),
        command.join(" ").green(),
        artifact.short_id().cyan(),
        artifact.exposed_port.to_string().yellow()
    );
    println!("  Watching {} for changes, Ctrl+C to stop", artifact.context_path.display());

    let code = run_with_reload(&artifact, command, config.supervisor_config(), shutdown_signal())
        .await
        .with_context(|| "Supervisor failed")?;

    if code == 0 {
        println!("{}", "Service exited".green());
    } else {
        println!("{} {}", "Service exited with code".yellow(), code.to_string().red());
    }
    Ok(code)
}
