#![allow(dead_code)]
//! Shared fixtures for the integration tests.

use anyhow::Result;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use xenstats_exporter::{
    app::App,
    collector::XenCollector,
    config::Config,
    core::GaugeMetric,
    xenapi::{test_utils::FakeXenApi, SessionManager},
};

pub const XEN1: &str = "OpaqueRef:host-xen1";
pub const LOCAL_SR: &str = "OpaqueRef:sr-local";
pub const NFS_SR: &str = "OpaqueRef:sr-nfs";
pub const POOL: &str = "OpaqueRef:pool-main";

/// A configuration that never leaves the test process.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.xenhost = "pool-master.test".to_string();
    config.credentials.username = "root".to_string();
    config.credentials.password = "secret".to_string();
    config.xenapi.call_timeout_ms = 500;
    config.server.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.server.internal_metrics = false;
    config
}

/// One host `xen1` with 8 GiB of memory (half free), 4 physical CPUs and a
/// single VM using 2 vCPUs; two storage repositories of which the local one
/// is the pool default.
pub fn single_host_pool() -> Arc<FakeXenApi> {
    let api = Arc::new(FakeXenApi::new());
    api.add_host(XEN1, "xen1", "8589934592", "4294967296");
    api.set_host_cpus(XEN1, 4);
    api.add_resident_vm(XEN1, "OpaqueRef:vm-web", "2");
    api.add_storage(
        LOCAL_SR,
        "Local storage",
        "6b1c6a3e-0000-4000-8000-000000000001",
        "107374182400",
        "53687091200",
        "214748364800",
    );
    api.add_storage(
        NFS_SR,
        "NFS ISO library",
        "6b1c6a3e-0000-4000-8000-000000000002",
        "0",
        "1048576",
        "1073741824",
    );
    api.add_pool(POOL, "main", LOCAL_SR);
    api
}

pub fn collector_for(api: Arc<FakeXenApi>, config: &Config) -> XenCollector {
    let sessions = Arc::new(SessionManager::with_transport(config, api));
    XenCollector::new(config, sessions)
}

/// Finds the gauge `name` whose variable label has the given value.
pub fn find<'a>(metrics: &'a [GaugeMetric], name: &str, label_value: &str) -> Option<&'a GaugeMetric> {
    metrics
        .iter()
        .find(|m| m.name() == name && m.label().1 == label_value)
}

pub fn count_named(metrics: &[GaugeMetric], name: &str) -> usize {
    metrics.iter().filter(|m| m.name() == name).count()
}

/// A running exporter backed by a fake XenAPI.
pub struct TestApp {
    pub api: Arc<FakeXenApi>,
    shutdown_tx: watch::Sender<bool>,
    app_handle: Option<JoinHandle<Result<()>>>,
    addr: SocketAddr,
}

impl TestApp {
    pub async fn start(api: Arc<FakeXenApi>, config: Config) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = App::builder(config)
            .transport_override(api.clone())
            .internal_metrics_override(None)
            .build(shutdown_rx)
            .await?;
        let addr = app.metrics_addr();
        let app_handle = tokio::spawn(app.run());
        Ok(Self {
            api,
            shutdown_tx,
            app_handle: Some(app_handle),
            addr,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Shuts down the application and waits for it to terminate.
    pub async fn shutdown(mut self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .expect("Failed to send shutdown signal");

        if let Some(handle) = self.app_handle.take() {
            match timeout(timeout_duration, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            }
        } else {
            Ok(())
        }
    }
}
