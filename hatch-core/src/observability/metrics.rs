//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    describe_histogram!("hatch_build_duration_seconds", "Image build duration (by variant)");
    describe_counter!("hatch_build_failures_total", "Total number of build failures (by step)");
    describe_counter!("hatch_layer_cache_hits_total", "Layers reused from the layer cache");
    describe_counter!("hatch_layer_cache_misses_total", "Layers rebuilt after a cache miss");

    describe_counter!(
        "hatch_supervisor_restarts_total",
        "Supervised process restarts triggered by file changes"
    );
    describe_counter!("hatch_supervisor_exits_total", "Supervised process exits (by reason)");
}

pub fn record_build(variant: &str, duration_secs: f64) {
    histogram!("hatch_build_duration_seconds", "variant" => variant.to_string())
        .record(duration_secs);
}

pub fn record_build_failure(step: &str) {
    counter!("hatch_build_failures_total", "step" => step.to_string()).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("hatch_layer_cache_hits_total").increment(1);
    } else {
        counter!("hatch_layer_cache_misses_total").increment(1);
    }
}

pub fn record_restart() {
    counter!("hatch_supervisor_restarts_total").increment(1);
}

pub fn record_exit(reason: &str) {
    counter!("hatch_supervisor_exits_total", "reason" => reason.to_string()).increment(1);
}
