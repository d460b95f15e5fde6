//! Image building for hatch.
//!
//! Build contexts, backends, the layer cache, the executor that ties them
//! together, Dockerfile rendering and the image store.

pub mod backend;
pub mod cache;
pub mod context;
pub mod dockerfile;
pub mod executor;
pub mod store;

pub use backend::{ArchiveBackend, BackendError, BuildBackend};
pub use cache::{CacheError, CacheLookup, CacheStats, LayerCache, LayerMetadata};
pub use context::{BuildContext, ContextFile};
pub use dockerfile::render_dockerfile;
pub use executor::{BuildError, BuildResult, ImageBuilder, StepProgress};
pub use store::{ImageArtifact, ImageStore, Layer};
