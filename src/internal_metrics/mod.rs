//! # Internal Metrics Module
//!
//! Metrics about the exporter itself, kept apart from the Xen gauges.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: installs the global Prometheus recorder that backs
//!   the `metrics::` macros used across the crate and describes every
//!   internal metric.
//!
//! - **`exposition`**: renders the gauges of one collection pass into the
//!   Prometheus text format.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that runs a collection pass on every scrape.

pub mod exposition;
pub mod server;

use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::error;

/// Registers descriptions for all internal metrics with the global recorder.
pub fn describe() {
    metrics::describe_histogram!(
        "xenstats_exporter_collection_duration_seconds",
        Unit::Seconds,
        "Time taken by one full collection pass against the XenAPI endpoint."
    );
    metrics::describe_counter!(
        "xenstats_exporter_collection_failures_total",
        Unit::Count,
        "Collection failures, labeled by the metric family (or session) that failed."
    );
    metrics::describe_gauge!(
        "xenstats_exporter_collected_gauges",
        Unit::Count,
        "Number of Xen gauges produced by the most recent collection pass."
    );
    metrics::describe_counter!(
        "xenstats_exporter_session_logins_total",
        Unit::Count,
        "Successful XenAPI logins performed by this process."
    );
}

/// Builder for the internal metrics system.
pub struct MetricsBuilder {
    enabled: bool,
}

impl MetricsBuilder {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Installs the global recorder and returns a handle to render it.
    ///
    /// Returns `None` when internal metrics are disabled or a global recorder
    /// is already installed; the `metrics::` macros are then no-ops.
    pub fn install(self) -> Option<PrometheusHandle> {
        if !self.enabled {
            return None;
        }

        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        ) {
            Ok(builder) => builder,
            Err(e) => {
                error!("Invalid histogram buckets for internal metrics: {}", e);
                return None;
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return None;
        }

        describe();
        Some(handle)
    }
}
