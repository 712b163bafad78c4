//! # Metrics Server
//!
//! This module defines the `MetricsServer`, an `axum`-based web server that
//! answers Prometheus scrapes.
//!
//! Every request to the metrics path triggers one collection pass; the Xen
//! gauges of that pass are rendered first, followed by the exporter's
//! internal metrics. When the metrics path is not `/`, a small landing page
//! is served at `/`.
//!
//! The server shuts down gracefully when the shutdown channel fires.

use crate::collector::XenCollector;
use crate::internal_metrics::exposition;
use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct ScrapeState {
    collector: Arc<XenCollector>,
    internal: Option<PrometheusHandle>,
}

/// A server that exposes Xen metrics to a Prometheus scraper.
pub struct MetricsServer {
    listener: TcpListener,
    metrics_path: String,
    state: ScrapeState,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Creates a new `MetricsServer` but does not spawn it.
    ///
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `metrics_path` - The path scrapes are served under.
    /// * `collector` - Runs a collection pass per scrape.
    /// * `internal` - Renders the exporter's own metrics, if enabled.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(
        listener: TcpListener,
        metrics_path: String,
        collector: Arc<XenCollector>,
        internal: Option<PrometheusHandle>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            metrics_path,
            state: ScrapeState {
                collector,
                internal,
            },
            shutdown_rx,
        }
    }

    /// Builds the routes: the scrape endpoint and, unless it sits at `/`, a
    /// landing page linking to it.
    pub fn router(
        metrics_path: &str,
        collector: Arc<XenCollector>,
        internal: Option<PrometheusHandle>,
    ) -> Router {
        let mut router = Router::new().route(metrics_path, get(scrape));
        if metrics_path != "/" {
            let landing = landing_page(metrics_path);
            router = router.route(
                "/",
                get(move || {
                    let landing = landing.clone();
                    async move { Html(landing) }
                }),
            );
        }
        router.with_state(ScrapeState {
            collector,
            internal,
        })
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(self) -> impl Future<Output = ()> {
        let app = Self::router(&self.metrics_path, self.state.collector, self.state.internal);
        let mut shutdown_rx = self.shutdown_rx;
        let listener = self.listener;

        async move {
            let shutdown = async move {
                shutdown_rx.changed().await.ok();
                trace!("Metrics server received shutdown signal.");
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Metrics server error: {}", e);
            }
            trace!("Metrics server task finished.");
        }
    }
}

async fn scrape(State(state): State<ScrapeState>) -> impl IntoResponse {
    let collection = state.collector.collect().await;
    let mut body = exposition::render(&collection.metrics);
    if let Some(handle) = &state.internal {
        body.push_str(&handle.render());
    }
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

fn landing_page(metrics_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>Xenstats Exporter</title></head>\n\
         <body>\n\
         <h1>Xenstats Exporter</h1>\n\
         <p><a href=\"{metrics_path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    )
}
