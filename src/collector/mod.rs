//! The collection orchestrator.
//!
//! Each pass reuses (or establishes) the shared XenAPI session, runs every
//! metric family against it and concatenates the results. A family that fails
//! contributes nothing to the pass; the others are unaffected. There is no
//! retry inside a pass: the next scrape is the retry.

pub mod builders;

use crate::{
    config::Config,
    core::GaugeMetric,
    xenapi::{SessionManager, ValueAccessor, XenError},
};
use builders::BuildContext;
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// A group of gauges built from the same kind of XenAPI resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFamily {
    HostMemory,
    Storage,
    HostCpu,
    Pool,
}

impl MetricFamily {
    /// Every family, in the order their gauges appear in a pass.
    pub const ALL: [MetricFamily; 4] = [
        MetricFamily::HostMemory,
        MetricFamily::Storage,
        MetricFamily::HostCpu,
        MetricFamily::Pool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::HostMemory => "host_memory",
            MetricFamily::Storage => "storage",
            MetricFamily::HostCpu => "host_cpu",
            MetricFamily::Pool => "pool",
        }
    }

    async fn build(self, ctx: &BuildContext<'_>) -> Result<Vec<GaugeMetric>, XenError> {
        match self {
            MetricFamily::HostMemory => builders::host_memory(ctx).await,
            MetricFamily::Storage => builders::storage(ctx).await,
            MetricFamily::HostCpu => builders::host_cpu(ctx).await,
            MetricFamily::Pool => builders::pool(ctx).await,
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What part of a pass a failure took down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// The session could not be established; the pass produced nothing.
    Session,
    Family(MetricFamily),
}

impl FailureScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureScope::Session => "session",
            FailureScope::Family(family) => family.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionFailure {
    pub scope: FailureScope,
    pub error: XenError,
}

/// The outcome of one collection pass.
#[derive(Debug, Default)]
pub struct Collection {
    pub metrics: Vec<GaugeMetric>,
    pub failures: Vec<CollectionFailure>,
}

impl Collection {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, family: MetricFamily) -> bool {
        self.failures
            .iter()
            .any(|f| f.scope == FailureScope::Family(family))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Collecting,
}

/// Runs collection passes against one XenAPI pool.
///
/// Passes may overlap; each one runs to completion independently.
pub struct XenCollector {
    sessions: Arc<SessionManager>,
    namespace: String,
    call_timeout: Duration,
    in_flight: AtomicUsize,
}

impl XenCollector {
    pub fn new(config: &Config, sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            namespace: config.namespace.clone(),
            call_timeout: config.xenapi.call_timeout(),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> CollectorState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            CollectorState::Collecting
        } else {
            CollectorState::Idle
        }
    }

    /// Runs one full collection pass.
    pub async fn collect(&self) -> Collection {
        let _pass = PassGuard::enter(&self.in_flight);
        let start = Instant::now();

        let session = match self.sessions.session().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Could not establish XenAPI session, skipping collection");
                metrics::counter!("xenstats_exporter_collection_failures_total", "family" => "session")
                    .increment(1);
                return Collection {
                    metrics: Vec::new(),
                    failures: vec![CollectionFailure {
                        scope: FailureScope::Session,
                        error: e,
                    }],
                };
            }
        };

        let accessor = ValueAccessor::new(session, self.call_timeout);
        let ctx = BuildContext {
            accessor: &accessor,
            namespace: &self.namespace,
        };

        let results = join_all(MetricFamily::ALL.iter().map(|family| family.build(&ctx))).await;

        let mut collection = Collection::default();
        for (family, result) in MetricFamily::ALL.into_iter().zip(results) {
            match result {
                Ok(gauges) => {
                    debug!(%family, count = gauges.len(), "Metric family collected");
                    collection.metrics.extend(gauges);
                }
                Err(e) => {
                    warn!(%family, error = %e, "Xen api error while building metric family");
                    metrics::counter!("xenstats_exporter_collection_failures_total", "family" => family.as_str())
                        .increment(1);
                    collection.failures.push(CollectionFailure {
                        scope: FailureScope::Family(family),
                        error: e,
                    });
                }
            }
        }

        metrics::histogram!("xenstats_exporter_collection_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        metrics::gauge!("xenstats_exporter_collected_gauges").set(collection.metrics.len() as f64);
        collection
    }
}

/// Marks a pass as in flight until dropped, including when the pass future
/// is cancelled.
struct PassGuard<'a>(&'a AtomicUsize);

impl<'a> PassGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
