//! The main application logic, decoupled from the entry point.

use crate::{
    collector::XenCollector,
    config::Config,
    core::XenTransport,
    internal_metrics::{server::MetricsServer, MetricsBuilder},
    task_manager::TaskManager,
    xenapi::SessionManager,
};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A handle to the running application, containing all its task handles.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: SocketAddr,
    sessions: Arc<SessionManager>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the metrics server is actually bound to.
    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Waits for the shutdown signal, stops all tasks and closes the XenAPI
    /// session.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.shutdown_rx();
        // A dropped sender also counts as shutdown.
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown(SHUTDOWN_GRACE).await;
        self.sessions.logout().await;

        info!("Xenstats exporter stopped.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Components can be overridden for testing purposes.
pub struct AppBuilder {
    config: Config,
    transport_override: Option<Arc<dyn XenTransport>>,
    internal_metrics_override: Option<Option<PrometheusHandle>>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport_override: None,
            internal_metrics_override: None,
        }
    }

    /// Talks to the given transport instead of the configured XenAPI host.
    pub fn transport_override(mut self, transport: Arc<dyn XenTransport>) -> Self {
        self.transport_override = Some(transport);
        self
    }

    /// Uses the given handle for internal metrics instead of installing a
    /// global recorder. `None` disables them.
    pub fn internal_metrics_override(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.internal_metrics_override = Some(handle);
        self
    }

    /// Builds and initializes all application components, returning a runnable `App`.
    ///
    /// No XenAPI call is made here; the session is established by the first
    /// scrape.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        let internal = match self.internal_metrics_override {
            Some(handle) => handle,
            None => MetricsBuilder::new(config.server.internal_metrics).install(),
        };

        let sessions = Arc::new(match self.transport_override {
            Some(transport) => SessionManager::with_transport(&config, transport),
            None => SessionManager::new(&config),
        });
        let collector = Arc::new(XenCollector::new(&config, sessions.clone()));

        let listener = TcpListener::bind(config.server.listen_address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind metrics server to {}",
                    config.server.listen_address
                )
            })?;
        let metrics_addr = listener.local_addr()?;

        let server = MetricsServer::new(
            listener,
            config.server.metrics_path.clone(),
            collector,
            internal,
            task_manager.shutdown_rx(),
        );
        task_manager.spawn("MetricsServer", server.run());

        info!(
            address = %metrics_addr,
            path = %config.server.metrics_path,
            xenhost = %config.xenhost,
            "Serving Xen metrics"
        );

        Ok(App {
            task_manager,
            metrics_addr,
            sessions,
        })
    }
}
