//! Build backends.
//!
//! A backend materializes one [`BuildStep`] at a time and hands back the layer
//! blob it produced. The executor owns ordering, caching and error reporting;
//! backends only know how to turn a single step into bytes.

use crate::builder::context::BuildContext;
use crate::planner::{BuildStep, StepKind};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Error raised by a backend while materializing a step.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Build input not found: {path:?}")]
    MissingInput { path: PathBuf },

    #[error("Failed to encode layer: {0}")]
    Encode(String),

    #[error("{0}")]
    Failed(String),
}

/// Something that can materialize every [`StepKind`].
pub trait BuildBackend {
    /// Backend name (for logging/metrics).
    fn name(&self) -> &str;

    /// Materializes one step.
    ///
    /// Returns the layer blob, or `None` for steps that only change image
    /// metadata.
    fn apply(
        &mut self,
        index: usize,
        step: &BuildStep,
        context: &BuildContext,
    ) -> Result<Option<Vec<u8>>, BackendError>;
}

/// JSON record stored as the layer of a step that runs a command.
#[derive(Debug, Serialize)]
struct RunRecord<'a> {
    kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
}

/// Local backend producing tar archives for copy steps and run records for
/// command steps.
#[derive(Debug, Default)]
pub struct ArchiveBackend;

impl ArchiveBackend {
    pub fn new() -> Self {
        Self
    }

    fn archive(&self, step: &BuildStep, context: &BuildContext) -> Result<Vec<u8>, BackendError> {
        let files = context.files_for(step)?;
        let mut builder = tar::Builder::new(Vec::new());

        for file in files {
            let data = std::fs::read(&file.host_path)
                .map_err(|source| BackendError::Io { path: file.host_path.clone(), source })?;

            // Fixed mtime keeps archives byte-identical for identical content.
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();

            builder
                .append_data(&mut header, &file.image_path, data.as_slice())
                .map_err(|source| BackendError::Io { path: file.host_path.clone(), source })?;
        }

        builder.into_inner().map_err(|e| BackendError::Encode(e.to_string()))
    }

    fn record(&self, step: &BuildStep) -> Result<Vec<u8>, BackendError> {
        let record = RunRecord {
            kind: step.kind(),
            base_image: match step {
                BuildStep::SetBase { image } => Some(image.as_str()),
                _ => None,
            },
            command: step.run_command(),
        };
        serde_json::to_vec(&record).map_err(|e| BackendError::Encode(e.to_string()))
    }
}

impl BuildBackend for ArchiveBackend {
    fn name(&self) -> &str {
        "archive"
    }

    fn apply(
        &mut self,
        index: usize,
        step: &BuildStep,
        context: &BuildContext,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        debug!(index, step = %step, "Materializing step");

        match step {
            BuildStep::CopyFile { .. } | BuildStep::CopyRest { .. } => {
                self.archive(step, context).map(Some)
            }
            BuildStep::SetBase { .. }
            | BuildStep::InstallSystemPackages { .. }
            | BuildStep::InstallDependencies { .. } => self.record(step).map(Some),
            BuildStep::SetExposedPort { .. } | BuildStep::SetEntrypoint { .. } => Ok(None),
        }
    }
}
