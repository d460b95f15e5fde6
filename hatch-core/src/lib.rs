//! Hatch Core Library
//!
//! Build variant resolution, layered image builds and a hot-reload runtime
//! supervisor for Python web services.

pub mod builder;
pub mod config;
pub mod error;
pub mod observability;
pub mod paths;
pub mod planner;
pub mod supervisor;
pub mod variant;

// Re-export commonly used items
pub use builder::{
    render_dockerfile, ArchiveBackend, BuildContext, BuildError, ImageArtifact, ImageBuilder,
    ImageStore, LayerCache,
};
pub use config::Config;
pub use error::{HatchError, Result};
pub use observability::init as init_observability;
pub use planner::{plan, BuildStep, StepKind};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError, SupervisorState};
pub use variant::{select_variant, VariantSpec, VariantTable};
