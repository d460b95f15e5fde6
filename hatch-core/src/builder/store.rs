//! Image artifacts and the on-disk image store.
//!
//! One artifact is kept per variant; building a variant again replaces it.

use crate::error::{HatchError, Result};
use crate::paths;
use crate::planner::BuildStep;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// One materialized layer of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub step: BuildStep,
    /// Chained cache key (parent key, step and input content)
    pub cache_key: String,
    /// SHA256 of the layer blob; `None` for metadata-only steps
    pub digest: Option<String>,
    pub size_bytes: u64,
    /// Whether the blob was reused from the layer cache
    pub cached: bool,
}

/// A built image. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// SHA256 over the layer cache keys
    pub id: String,
    pub variant: String,
    pub layers: Vec<Layer>,
    pub exposed_port: u16,
    pub entrypoint: Vec<String>,
    pub workdir: String,
    /// Host project directory the image was built from
    pub context_path: PathBuf,
    /// RFC 3339 timestamp
    pub created: String,
}

impl ImageArtifact {
    /// Short form of the image id.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    pub fn steps(&self) -> impl Iterator<Item = &BuildStep> {
        self.layers.iter().map(|l| &l.step)
    }

    pub fn cached_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.cached).count()
    }

    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size_bytes).sum()
    }
}

/// Stores artifacts as `<dir>/<variant>.json`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `<data_dir>/images`.
    pub fn open_default() -> Self {
        Self::new(paths::images_dir())
    }

    fn artifact_path(&self, variant: &str) -> PathBuf {
        self.dir.join(format!("{}.json", variant))
    }

    /// Saves an artifact, replacing any previous image of the same variant.
    pub fn save(&self, artifact: &ImageArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|source| HatchError::IoError { path: self.dir.clone(), source })?;

        let path = self.artifact_path(&artifact.variant);
        let json = serde_json::to_string_pretty(artifact).map_err(HatchError::internal)?;

        // Write then rename so readers never see a partial artifact.
        let tmp = self.dir.join(format!(".{}.{}.tmp", artifact.variant, uuid::Uuid::new_v4()));
        fs::write(&tmp, json).map_err(|source| HatchError::IoError { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| HatchError::IoError { path: path.clone(), source })?;

        info!(variant = %artifact.variant, id = %artifact.short_id(), "Stored image");
        Ok(path)
    }

    pub fn load(&self, variant: &str) -> Result<ImageArtifact> {
        let path = self.artifact_path(variant);
        if !path.exists() {
            return Err(HatchError::ImageNotFound { variant: variant.to_string() });
        }
        let content = fs::read_to_string(&path)
            .map_err(|source| HatchError::IoError { path: path.clone(), source })?;
        serde_json::from_str(&content)
            .map_err(|e| HatchError::InvalidArtifact { path, reason: e.to_string() })
    }

    /// Lists stored artifacts, sorted by variant name.
    pub fn list(&self) -> Result<Vec<ImageArtifact>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .map_err(|source| HatchError::IoError { path: self.dir.clone(), source })?;

        let mut artifacts = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| HatchError::IoError { path: self.dir.clone(), source })?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(variant) = path.file_stem().and_then(|s| s.to_str()) {
                    match self.load(variant) {
                        Ok(artifact) => artifacts.push(artifact),
                        Err(e) => debug!(?path, error = %e, "Skipping unreadable artifact"),
                    }
                }
            }
        }
        artifacts.sort_by(|a, b| a.variant.cmp(&b.variant));
        Ok(artifacts)
    }
}
