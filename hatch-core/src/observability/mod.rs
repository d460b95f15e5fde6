//! Observability infrastructure: tracing and metrics.
//!
//! Every component logs through `tracing`; counters and histograms go through
//! the `metrics` facade and cost nothing until a recorder is installed.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this twice is an
/// error rather than a panic.
pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    metrics::register_core_metrics();
    tracing::debug!(default_level, "Observability initialized");
    Ok(())
}
