//! Build command implementation for the Hatch CLI.
//!
//! Builds a variant's image from a project directory with a progress bar and
//! layer caching.

use super::{format_size, resolve_variant};
use crate::VariantArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use hatch_core::builder::StepProgress;
use hatch_core::{
    plan, ArchiveBackend, BuildContext, Config, ImageArtifact, ImageBuilder, ImageStore,
    LayerCache,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;

/// Builds and stores the image for the selected variant.
pub fn build(config: &Config, context_path: &Path, args: &VariantArgs, no_cache: bool) -> Result<()> {
    build_image(config, context_path, args, no_cache).map(|_| ())
}

/// Builds the selected variant and returns the stored artifact.
pub(crate) fn build_image(
    config: &Config,
    context_path: &Path,
    args: &VariantArgs,
    no_cache: bool,
) -> Result<ImageArtifact> {
    let start_time = Instant::now();

    if !context_path.is_dir() {
        anyhow::bail!("Build context not found: {}", context_path.display());
    }
    let context_dir = context_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", context_path.display()))?;

    let spec = resolve_variant(config, args)?;
    println!(
        "{} Building variant {} from {}",
        "[1/3]".bold().blue(),
        spec.name.green(),
        spec.base_image_ref.cyan()
    );

    let steps = plan(&spec);
    println!("  {} steps planned", steps.len().to_string().yellow());

    println!("{} Opening layer cache", "[2/3]".bold().blue());
    let cache = LayerCache::open_default(config.cache_size_limit_bytes)
        .with_context(|| "Failed to open layer cache")?;
    if no_cache {
        println!("  {}", "Cache disabled".yellow());
    } else {
        println!("  {}", "Cache enabled".green());
    }

    let mut context = BuildContext::new(&context_dir, &spec.name);
    context.no_cache = no_cache;
    context.preflight(&spec)?;

    println!("{} Executing build", "[3/3]".bold().blue());
    let pb = ProgressBar::new(steps.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .with_context(|| "Invalid progress template")?
            .progress_chars("=>-"),
    );

    let mut builder = ImageBuilder::new(ArchiveBackend::new()).with_cache(cache);
    let result = builder.build_with_progress(&steps, &context, |progress: StepProgress<'_>| {
        let marker = if progress.cached { " (cached)" } else { "" };
        pb.set_message(format!("Step {}: {}{}", progress.index, progress.step.kind(), marker));
        pb.inc(1);
    });

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(e) => {
            pb.abandon_with_message("Build failed");
            return Err(e).with_context(|| format!("Failed to build variant '{}'", spec.name));
        }
    };
    pb.finish_with_message("Build complete");

    let stored = ImageStore::open_default().save(&artifact)?;

    let duration = start_time.elapsed();
    println!();
    println!("{}", "Build completed successfully!".green().bold());
    println!();
    println!("  Image ID:    {}", artifact.short_id().cyan());
    println!("  Variant:     {}", artifact.variant.green());
    println!("  Layers:      {} ({} cached)", artifact.layers.len(), artifact.cached_layers());
    println!("  Total size:  {}", format_size(artifact.size_bytes()));
    println!("  Duration:    {}", format_duration(duration.as_secs_f64()).yellow());
    println!("  Stored at:   {}", stored.display().to_string().yellow());

    Ok(artifact)
}

/// Formats duration in seconds to human-readable form.
fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        format!("{}m {:.0}s", mins, secs - mins * 60.0)
    }
}
