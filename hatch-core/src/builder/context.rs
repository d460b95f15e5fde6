//! Build context: the project directory a build reads files from.

use crate::builder::backend::BackendError;
use crate::error::{HatchError, Result};
use crate::planner::BuildStep;
use crate::variant::VariantSpec;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Entries never copied into the image nor hashed into cache keys.
pub const DEFAULT_IGNORE: [&str; 7] =
    [".git", "__pycache__", "*.pyc", ".venv", "node_modules", ".hatch", ".DS_Store"];

/// Build context containing source files and options.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Project directory
    pub context_path: PathBuf,
    /// Variant being built (names the stored artifact)
    pub variant: String,
    /// Skip cache lookups
    pub no_cache: bool,
    /// Ignore patterns: exact path components or `*.ext` suffixes
    pub ignore: Vec<String>,
}

/// A context file selected by a copy step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    /// Path on the host
    pub host_path: PathBuf,
    /// Path inside the image, without a leading slash
    pub image_path: String,
}

impl BuildContext {
    pub fn new(context_path: impl Into<PathBuf>, variant: impl Into<String>) -> Self {
        Self {
            context_path: context_path.into(),
            variant: variant.into(),
            no_cache: false,
            ignore: DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Checks that the project directory and the variant's dependency
    /// manifest exist before any step runs.
    pub fn preflight(&self, spec: &VariantSpec) -> Result<()> {
        if !self.context_path.is_dir() {
            return Err(HatchError::FileNotFound {
                path: self.context_path.clone(),
                hint: "Build context must be a directory".into(),
            });
        }
        let manifest = self.context_path.join(&spec.python_requirements_path);
        if !manifest.is_file() {
            return Err(HatchError::FileNotFound {
                path: manifest,
                hint: "Create the dependency manifest or set manifest_path in config.json".into(),
            });
        }
        Ok(())
    }

    /// Files a step reads from the context, sorted by image path.
    ///
    /// Steps that read nothing return an empty list.
    pub fn files_for(&self, step: &BuildStep) -> std::result::Result<Vec<ContextFile>, BackendError> {
        match step {
            BuildStep::CopyFile { source, destination } => {
                let host_path = self.context_path.join(source);
                if !host_path.is_file() {
                    return Err(BackendError::MissingInput { path: host_path });
                }
                Ok(vec![ContextFile {
                    host_path,
                    image_path: destination.trim_start_matches('/').to_string(),
                }])
            }
            BuildStep::CopyRest { destination } => {
                if !self.context_path.is_dir() {
                    return Err(BackendError::MissingInput { path: self.context_path.clone() });
                }
                let mut relative = Vec::new();
                self.walk(&self.context_path, &mut relative)?;
                relative.sort();

                let prefix = destination.trim_matches('/');
                Ok(relative
                    .into_iter()
                    .map(|rel| {
                        let rel_str = rel.to_string_lossy().replace('\\', "/");
                        ContextFile {
                            host_path: self.context_path.join(&rel),
                            image_path: if prefix.is_empty() {
                                rel_str
                            } else {
                                format!("{}/{}", prefix, rel_str)
                            },
                        }
                    })
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// SHA256 over the image paths and contents of every file a step reads.
    pub fn input_digest(&self, step: &BuildStep) -> std::result::Result<String, BackendError> {
        let mut hasher = Sha256::new();
        for file in self.files_for(step)? {
            let data = fs::read(&file.host_path)
                .map_err(|source| BackendError::Io { path: file.host_path.clone(), source })?;
            hasher.update(file.image_path.as_bytes());
            hasher.update([0u8]);
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(&data);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Whether a context-relative path matches the ignore list.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        matches_ignore(relative, &self.ignore)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> std::result::Result<(), BackendError> {
        let entries =
            fs::read_dir(dir).map_err(|source| BackendError::Io { path: dir.to_path_buf(), source })?;

        for entry in entries {
            let entry = entry.map_err(|source| BackendError::Io { path: dir.to_path_buf(), source })?;
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&self.context_path) else {
                continue;
            };
            if self.is_ignored(relative) {
                continue;
            }
            let file_type =
                entry.file_type().map_err(|source| BackendError::Io { path: path.clone(), source })?;
            if file_type.is_symlink() {
                debug!(path = %relative.display(), "Skipping symlink in build context");
            } else if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() {
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }
}

/// Whether any component of `path` matches one of `patterns`.
///
/// A pattern is either an exact component name or `*suffix`.
pub fn matches_ignore(path: &Path, patterns: &[String]) -> bool {
    path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        patterns.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => name.ends_with(suffix),
            None => name == pattern.as_str(),
        })
    })
}
