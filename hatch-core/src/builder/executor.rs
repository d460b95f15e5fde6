//! Build executor.
//!
//! Applies a planned step sequence against a [`BuildBackend`], reusing cached
//! layers where the chained cache key matches. Steps run strictly in order and
//! the first failure aborts the build without producing an artifact.

use crate::builder::backend::{BackendError, BuildBackend};
use crate::builder::cache::{CacheLookup, LayerCache};
use crate::builder::context::BuildContext;
use crate::builder::store::{ImageArtifact, Layer};
use crate::observability::metrics as hatch_metrics;
use crate::planner::{BuildStep, StepKind, WORKDIR};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Error type for build operations.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Build step {step_index} ({kind}) failed: {source}")]
    StepFailed {
        step_index: usize,
        kind: StepKind,
        #[source]
        source: BackendError,
    },

    #[error("Nothing to build: the plan has no steps")]
    EmptyPlan,

    #[error("Invalid plan: {reason}")]
    InvalidPlan { reason: String },
}

/// Progress notification for one step.
#[derive(Debug, Clone, Copy)]
pub struct StepProgress<'a> {
    pub index: usize,
    pub total: usize,
    pub step: &'a BuildStep,
    pub cached: bool,
}

/// Builds images from planned steps.
pub struct ImageBuilder<B: BuildBackend> {
    backend: B,
    cache: Option<LayerCache>,
}

impl<B: BuildBackend> ImageBuilder<B> {
    /// Builder without a layer cache: every step hits the backend.
    pub fn new(backend: B) -> Self {
        Self { backend, cache: None }
    }

    pub fn with_cache(mut self, cache: LayerCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> Option<&LayerCache> {
        self.cache.as_ref()
    }

    /// Builds an image from `steps`.
    pub fn build(&mut self, steps: &[BuildStep], context: &BuildContext) -> BuildResult<ImageArtifact> {
        self.build_with_progress(steps, context, |_| {})
    }

    /// Builds an image, calling `on_step` after each step completes.
    #[instrument(skip_all, fields(variant = %context.variant, backend = self.backend.name()))]
    pub fn build_with_progress<F>(
        &mut self,
        steps: &[BuildStep],
        context: &BuildContext,
        mut on_step: F,
    ) -> BuildResult<ImageArtifact>
    where
        F: FnMut(StepProgress<'_>),
    {
        let start = Instant::now();
        let (exposed_port, entrypoint) = match validate(steps) {
            Ok(meta) => meta,
            Err(e) => {
                hatch_metrics::record_build_failure("invalid_plan");
                return Err(e);
            }
        };

        info!(steps = steps.len(), no_cache = context.no_cache, "Starting build");

        let mut layers = Vec::with_capacity(steps.len());
        let mut parent_key: Option<String> = None;

        for (index, step) in steps.iter().enumerate() {
            let layer = match self.build_step(index, step, parent_key.as_deref(), context) {
                Ok(layer) => layer,
                Err(e) => {
                    error!(index, kind = %step.kind(), error = %e, "Build aborted");
                    hatch_metrics::record_build_failure(&step.kind().to_string());
                    return Err(e);
                }
            };

            on_step(StepProgress { index, total: steps.len(), step, cached: layer.cached });
            parent_key = Some(layer.cache_key.clone());
            layers.push(layer);
        }

        let mut hasher = Sha256::new();
        for layer in &layers {
            hasher.update(layer.cache_key.as_bytes());
        }

        let artifact = ImageArtifact {
            id: format!("{:x}", hasher.finalize()),
            variant: context.variant.clone(),
            layers,
            exposed_port,
            entrypoint,
            workdir: WORKDIR.to_string(),
            context_path: context.context_path.clone(),
            created: chrono::Utc::now().to_rfc3339(),
        };

        let duration = start.elapsed().as_secs_f64();
        hatch_metrics::record_build(&artifact.variant, duration);
        info!(
            id = %artifact.short_id(),
            layers = artifact.layers.len(),
            cached = artifact.cached_layers(),
            duration_secs = duration,
            "Build complete"
        );

        Ok(artifact)
    }

    fn build_step(
        &mut self,
        index: usize,
        step: &BuildStep,
        parent_key: Option<&str>,
        context: &BuildContext,
    ) -> BuildResult<Layer> {
        let step_failed =
            |source: BackendError| BuildError::StepFailed { step_index: index, kind: step.kind(), source };

        let input_digest = context.input_digest(step).map_err(step_failed)?;
        let cache_key = cache_key(parent_key, step, &input_digest);

        if !context.no_cache && !step.is_metadata_only() {
            if let Some(cache) = self.cache.as_mut() {
                let lookup = cache.lookup(&cache_key).unwrap_or_else(|e| {
                    warn!(index, cache_key = %cache_key, error = %e, "Discarding unreadable cache entry");
                    if let Err(e) = cache.remove(&cache_key) {
                        warn!(cache_key = %cache_key, error = %e, "Failed to remove cache entry");
                    }
                    CacheLookup::Miss
                });
                match lookup {
                    CacheLookup::Hit { metadata, .. } => {
                        info!(index, step = %step, "Using cached layer");
                        hatch_metrics::record_cache_lookup(true);
                        return Ok(Layer {
                            step: step.clone(),
                            cache_key,
                            digest: Some(metadata.digest),
                            size_bytes: metadata.size_bytes,
                            cached: true,
                        });
                    }
                    CacheLookup::Miss => hatch_metrics::record_cache_lookup(false),
                }
            }
        }

        debug!(index, step = %step, "Executing step");
        let blob = self.backend.apply(index, step, context).map_err(step_failed)?;

        let (digest, size_bytes) = match blob {
            Some(data) => {
                let digest = format!("{:x}", Sha256::digest(&data));
                if let Some(cache) = self.cache.as_mut() {
                    if let Err(e) = cache.insert(&cache_key, &data, &digest, step.to_string()) {
                        warn!(index, cache_key = %cache_key, error = %e, "Failed to cache layer");
                    }
                }
                (Some(digest), data.len() as u64)
            }
            None => (None, 0),
        };

        Ok(Layer { step: step.clone(), cache_key, digest, size_bytes, cached: false })
    }
}

/// Computes the chained cache key of a step.
pub fn cache_key(parent_key: Option<&str>, step: &BuildStep, input_digest: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(parent) = parent_key {
        hasher.update(parent.as_bytes());
    }
    // serde_json keeps field order stable, unlike a Debug dump of a map.
    let repr = serde_json::to_string(step).unwrap_or_else(|_| format!("{:?}", step));
    hasher.update(repr.as_bytes());
    hasher.update(input_digest.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checks plan shape and extracts exposed port and entrypoint.
fn validate(steps: &[BuildStep]) -> BuildResult<(u16, Vec<String>)> {
    let first = steps.first().ok_or(BuildError::EmptyPlan)?;
    if first.kind() != StepKind::SetBase {
        return Err(BuildError::InvalidPlan {
            reason: format!("first step must be SetBase, found {}", first.kind()),
        });
    }

    let port = steps.iter().rev().find_map(|s| match s {
        BuildStep::SetExposedPort { port } => Some(*port),
        _ => None,
    });
    let entrypoint = steps.iter().rev().find_map(|s| match s {
        BuildStep::SetEntrypoint { command } => Some(command.clone()),
        _ => None,
    });

    match (port, entrypoint) {
        (Some(port), Some(entrypoint)) => Ok((port, entrypoint)),
        (None, _) => Err(BuildError::InvalidPlan { reason: "no SetExposedPort step".into() }),
        (_, None) => Err(BuildError::InvalidPlan { reason: "no SetEntrypoint step".into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::backend::ArchiveBackend;
    use crate::planner::plan;
    use crate::variant::select_variant;
    use std::fs;
    use tempfile::TempDir;

    /// Backend that fails on a chosen step kind and counts calls.
    struct FlakyBackend {
        fail_on: Option<StepKind>,
        calls: Vec<StepKind>,
    }

    impl BuildBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn apply(
            &mut self,
            _index: usize,
            step: &BuildStep,
            _context: &BuildContext,
        ) -> Result<Option<Vec<u8>>, BackendError> {
            self.calls.push(step.kind());
            if Some(step.kind()) == self.fail_on {
                return Err(BackendError::Failed("exit status 100".into()));
            }
            Ok(Some(step.to_string().into_bytes()))
        }
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "fastapi\nuvicorn\n").unwrap();
        fs::write(dir.path().join("main.py"), "from fastapi import FastAPI\n").unwrap();
        dir
    }

    #[test]
    fn test_build_both_variants_expose_8000() {
        let dir = project();
        for flag in [false, true] {
            let spec = select_variant(flag).unwrap();
            let ctx = BuildContext::new(dir.path(), spec.name.clone());
            let artifact = ImageBuilder::new(ArchiveBackend::new()).build(&plan(&spec), &ctx).unwrap();

            assert_eq!(artifact.exposed_port, 8000);
            assert_eq!(artifact.variant, spec.name);
            assert_eq!(artifact.steps().cloned().collect::<Vec<_>>(), plan(&spec));
        }
    }

    #[test]
    fn test_step_failure_reports_index_and_kind() {
        let dir = project();
        let spec = select_variant(false).unwrap();
        let ctx = BuildContext::new(dir.path(), "minimal");
        let mut builder = ImageBuilder::new(FlakyBackend {
            fail_on: Some(StepKind::InstallDependencies),
            calls: Vec::new(),
        });

        let err = builder.build(&plan(&spec), &ctx).unwrap_err();
        match err {
            BuildError::StepFailed { step_index, kind, .. } => {
                assert_eq!(step_index, 3);
                assert_eq!(kind, StepKind::InstallDependencies);
            }
            other => panic!("Expected StepFailed, got {:?}", other),
        }
        // Nothing after the failing step ran.
        assert_eq!(builder.backend().calls.last(), Some(&StepKind::InstallDependencies));
        assert_eq!(builder.backend().calls.len(), 4);
    }

    #[test]
    fn test_missing_manifest_fails_copy_step() {
        let dir = TempDir::new().unwrap();
        let spec = select_variant(false).unwrap();
        let ctx = BuildContext::new(dir.path(), "minimal");

        let err = ImageBuilder::new(ArchiveBackend::new()).build(&plan(&spec), &ctx).unwrap_err();
        assert!(matches!(
            err,
            BuildError::StepFailed { step_index: 2, kind: StepKind::CopyFile, .. }
        ));
    }

    #[test]
    fn test_invalid_plans() {
        let ctx = BuildContext::new("/nonexistent", "minimal");
        let mut builder = ImageBuilder::new(ArchiveBackend::new());

        assert!(matches!(builder.build(&[], &ctx), Err(BuildError::EmptyPlan)));
        assert!(matches!(
            builder.build(&[BuildStep::SetExposedPort { port: 8000 }], &ctx),
            Err(BuildError::InvalidPlan { .. })
        ));
        assert!(matches!(
            builder.build(&[BuildStep::SetBase { image: "python:3.11".into() }], &ctx),
            Err(BuildError::InvalidPlan { .. })
        ));
    }

    #[test]
    fn test_cache_keys_chain() {
        let a = BuildStep::SetBase { image: "python:3.11".into() };
        let b = BuildStep::SetExposedPort { port: 8000 };

        let root = cache_key(None, &a, "");
        assert_eq!(root, cache_key(None, &a, ""));
        assert_ne!(cache_key(Some(&root), &b, ""), cache_key(None, &b, ""));
        assert_ne!(cache_key(None, &a, "x"), root);
    }
}
