//! Error types for hatch.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hatch operations.
pub type Result<T> = std::result::Result<T, HatchError>;

/// Main error type for hatch.
#[derive(Error, Debug)]
pub enum HatchError {
    // Variant errors
    #[error("Unknown variant: {reason}")]
    UnknownVariant { reason: String },

    // Build errors
    #[error(transparent)]
    Build(#[from] crate::builder::BuildError),

    #[error("Image not found: {variant}")]
    ImageNotFound { variant: String },

    #[error("Invalid image artifact at {path:?}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    // Supervisor errors
    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    // File system errors
    #[error("File not found: {path:?}. {hint}")]
    FileNotFound { path: PathBuf, hint: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HatchError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Name of the component that produced the error, for structured reports.
    pub fn component(&self) -> &'static str {
        match self {
            Self::UnknownVariant { .. } => "variant-selector",
            Self::Build(_) | Self::ImageNotFound { .. } | Self::InvalidArtifact { .. } => {
                "image-builder"
            }
            Self::Supervisor(_) => "runtime-supervisor",
            Self::InvalidConfig { .. } => "config",
            Self::FileNotFound { .. } | Self::IoError { .. } => "filesystem",
            Self::Internal(_) => "internal",
        }
    }
}
