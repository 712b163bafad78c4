//! Metric builders, one per family of XenAPI resources.
//!
//! Gauges that are a straight "read a field, convert, label" are described by
//! the [`FieldGauge`] tables below and produced by [`build_field_gauge`].
//! Derived gauges (CPU allocation) have dedicated code.

use crate::{
    core::{GaugeMetric, ResourceRef},
    xenapi::{ValueAccessor, XenError},
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Shared inputs of every builder during one collection pass.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub accessor: &'a ValueAccessor,
    pub namespace: &'a str,
}

/// How a field's value turns into a gauge value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// An integer, possibly string-encoded.
    Integer,
    /// A boolean, exported as 0 or 1.
    Flag,
}

/// One row of a declarative gauge table.
#[derive(Debug, Clone, Copy)]
pub struct FieldGauge {
    pub name: &'static str,
    pub help: &'static str,
    pub method: &'static str,
    pub unit: &'static str,
    pub kind: FieldKind,
}

/// Resolved against a host's `host_metrics` object.
pub const HOST_MEMORY_GAUGES: &[FieldGauge] = &[
    FieldGauge {
        name: "memory_total",
        help: "Total memory of the xen host",
        method: "host_metrics.get_memory_total",
        unit: "bytes",
        kind: FieldKind::Integer,
    },
    FieldGauge {
        name: "memory_free",
        help: "Free memory of the xen host",
        method: "host_metrics.get_memory_free",
        unit: "bytes",
        kind: FieldKind::Integer,
    },
];

/// Resolved against a storage repository.
pub const STORAGE_GAUGES: &[FieldGauge] = &[
    FieldGauge {
        name: "storage_virtual_allocation",
        help: "Storage allocated to virtual disks",
        method: "SR.get_virtual_allocation",
        unit: "bytes",
        kind: FieldKind::Integer,
    },
    FieldGauge {
        name: "storage_physical_utilisation",
        help: "Persistent data physical utilization",
        method: "SR.get_physical_utilisation",
        unit: "bytes",
        kind: FieldKind::Integer,
    },
    FieldGauge {
        name: "storage_physical_size",
        help: "Persistent data physical size",
        method: "SR.get_physical_size",
        unit: "bytes",
        kind: FieldKind::Integer,
    },
];

/// Resolved against a pool.
pub const POOL_GAUGES: &[FieldGauge] = &[
    FieldGauge {
        name: "pool_ha_enabled",
        help: "Whether high availability is enabled on the pool",
        method: "pool.get_ha_enabled",
        unit: "boolean",
        kind: FieldKind::Flag,
    },
    FieldGauge {
        name: "pool_ha_host_failures_to_tolerate",
        help: "Number of host failures the HA plan tolerates",
        method: "pool.get_ha_host_failures_to_tolerate",
        unit: "number",
        kind: FieldKind::Integer,
    },
    FieldGauge {
        name: "pool_ha_allow_overcommit",
        help: "Whether the pool may be overcommitted under HA",
        method: "pool.get_ha_allow_overcommit",
        unit: "boolean",
        kind: FieldKind::Flag,
    },
    FieldGauge {
        name: "pool_ha_overcommitted",
        help: "Whether the pool is currently overcommitted under HA",
        method: "pool.get_ha_overcommitted",
        unit: "boolean",
        kind: FieldKind::Flag,
    },
    FieldGauge {
        name: "pool_wlb_enabled",
        help: "Whether workload balancing is enabled on the pool",
        method: "pool.get_wlb_enabled",
        unit: "boolean",
        kind: FieldKind::Flag,
    },
];

/// The labels attached to every gauge built for one resource.
#[derive(Debug, Clone)]
pub struct LabelTarget {
    key: &'static str,
    value: String,
    extra: Vec<(String, String)>,
}

impl LabelTarget {
    pub fn new(key: &'static str, value: String) -> Self {
        Self {
            key,
            value,
            extra: Vec::new(),
        }
    }

    pub fn with_const(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.push((key.to_string(), value.into()));
        self
    }
}

/// Reads `field.method` on `resource` and wraps the result in a gauge.
pub async fn build_field_gauge(
    ctx: &BuildContext<'_>,
    field: &FieldGauge,
    resource: &ResourceRef,
    target: &LabelTarget,
) -> Result<GaugeMetric, XenError> {
    let value = match field.kind {
        FieldKind::Integer => ctx.accessor.get_i64(field.method, resource).await? as f64,
        FieldKind::Flag => {
            if ctx.accessor.get_bool(field.method, resource).await? {
                1.0
            } else {
                0.0
            }
        }
    };

    let mut const_labels = Vec::with_capacity(target.extra.len() + 1);
    const_labels.push(("unit".to_string(), field.unit.to_string()));
    const_labels.extend(target.extra.iter().cloned());

    Ok(GaugeMetric::new(
        ctx.namespace,
        field.name,
        field.help,
        const_labels,
        (target.key, target.value.as_str()),
        value,
    ))
}

/// Label value for a resource: its name, or its reference when the name is blank.
fn display_name(name: String, resource: &ResourceRef) -> String {
    if name.trim().is_empty() {
        debug!(reference = %resource, "Resource has an empty name label, using its reference");
        resource.to_string()
    } else {
        name
    }
}

async fn name_of(
    ctx: &BuildContext<'_>,
    method: &str,
    resource: &ResourceRef,
) -> Result<String, XenError> {
    let name = ctx.accessor.get_string(method, resource).await?;
    Ok(display_name(name, resource))
}

/// The `hostname` label of every host, in the order of `hosts`.
///
/// XAPI does not enforce unique name labels. Hosts that share one are
/// labeled by their reference instead, so each host keeps its own series.
async fn hostnames(ctx: &BuildContext<'_>, hosts: &[ResourceRef]) -> Result<Vec<String>, XenError> {
    let mut names = Vec::with_capacity(hosts.len());
    for host in hosts {
        names.push(name_of(ctx, "host.get_name_label", host).await?);
    }

    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(names.len());
    for name in &names {
        *seen.entry(name.as_str()).or_default() += 1;
    }
    let shared: HashSet<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();

    Ok(hosts
        .iter()
        .zip(names)
        .map(|(host, name)| {
            if shared.contains(&name) {
                warn!(
                    host = %host,
                    hostname = %name,
                    "Several hosts share this name label, using the host reference"
                );
                host.to_string()
            } else {
                name
            }
        })
        .collect())
}

/// Total and free memory of every host, labeled by hostname.
pub async fn host_memory(ctx: &BuildContext<'_>) -> Result<Vec<GaugeMetric>, XenError> {
    let hosts = ctx.accessor.get_references("host.get_all", None).await?;
    let names = hostnames(ctx, &hosts).await?;
    let mut gauges = Vec::with_capacity(hosts.len() * HOST_MEMORY_GAUGES.len());

    for (host, hostname) in hosts.iter().zip(names) {
        let target = LabelTarget::new("hostname", hostname);
        let host_metrics = ctx.accessor.get_reference("host.get_metrics", host).await?;
        for field in HOST_MEMORY_GAUGES {
            gauges.push(build_field_gauge(ctx, field, &host_metrics, &target).await?);
        }
    }
    Ok(gauges)
}

/// Allocation, utilisation and size of every storage repository.
///
/// A repository is flagged `default_storage="true"` when some pool names it
/// as its default SR.
pub async fn storage(ctx: &BuildContext<'_>) -> Result<Vec<GaugeMetric>, XenError> {
    let repositories = ctx.accessor.get_references("SR.get_all", None).await?;
    let pools = ctx.accessor.get_references("pool.get_all", None).await?;

    let mut defaults = HashSet::with_capacity(pools.len());
    for pool in &pools {
        defaults.insert(ctx.accessor.get_reference("pool.get_default_SR", pool).await?);
    }

    let mut gauges = Vec::with_capacity(repositories.len() * STORAGE_GAUGES.len());
    for sr in &repositories {
        let name = name_of(ctx, "SR.get_name_label", sr).await?;
        let uuid = ctx.accessor.get_string("SR.get_uuid", sr).await?;
        let target = LabelTarget::new("label", name)
            .with_const("default_storage", defaults.contains(sr).to_string())
            .with_const("uuid", uuid);
        for field in STORAGE_GAUGES {
            gauges.push(build_field_gauge(ctx, field, sr, &target).await?);
        }
    }
    Ok(gauges)
}

/// Physical CPUs of a host against the virtual CPUs of its resident VMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuAllocation {
    pub total: i64,
    pub used: i64,
    pub vms: i64,
}

impl CpuAllocation {
    /// Negative when the host's VMs are allocated more VCPUs than it has cores.
    pub fn free(&self) -> i64 {
        self.total.saturating_sub(self.used)
    }

    /// `100 * used / total` in integer arithmetic, or `None` for a host that
    /// reports no physical CPUs.
    pub fn utilization_percent(&self) -> Option<i64> {
        self.used
            .checked_mul(100)
            .and_then(|scaled| scaled.checked_div(self.total))
    }
}

async fn cpu_allocation(
    ctx: &BuildContext<'_>,
    host: &ResourceRef,
) -> Result<CpuAllocation, XenError> {
    let cpus = ctx.accessor.get_references("host.get_host_CPUs", Some(host)).await?;
    let vms = ctx.accessor.get_references("host.get_resident_VMs", Some(host)).await?;

    let mut used: i64 = 0;
    for vm in &vms {
        let vm_metrics = ctx.accessor.get_reference("VM.get_metrics", vm).await?;
        let vcpus = ctx
            .accessor
            .get_i64("VM_metrics.get_VCPUs_number", &vm_metrics)
            .await?;
        // The sum must stay small enough for the utilization percentage.
        used = used
            .checked_add(vcpus)
            .filter(|sum| sum.checked_mul(100).is_some())
            .ok_or_else(|| XenError::Coercion {
                method: "VM_metrics.get_VCPUs_number".to_string(),
                reference: vm.to_string(),
                expected: "a VCPU count whose host total fits in 64 bits",
                found: vcpus.to_string(),
            })?;
    }

    Ok(CpuAllocation {
        total: cpus.len() as i64,
        used,
        vms: vms.len() as i64,
    })
}

/// CPU allocation and VM density of every host, labeled by hostname.
pub async fn host_cpu(ctx: &BuildContext<'_>) -> Result<Vec<GaugeMetric>, XenError> {
    let hosts = ctx.accessor.get_references("host.get_all", None).await?;
    let mut gauges = Vec::with_capacity(hosts.len() * 5);

    let names = hostnames(ctx, &hosts).await?;

    for (host, hostname) in hosts.iter().zip(names) {
        let allocation = cpu_allocation(ctx, host).await?;
        let gauge = |name: &str, help: &'static str, unit: &str, value: i64| {
            GaugeMetric::new(
                ctx.namespace,
                name,
                help,
                vec![("unit".to_string(), unit.to_string())],
                ("hostname", hostname.as_str()),
                value as f64,
            )
        };

        gauges.push(gauge(
            "cpus_host_num",
            "Number of cpu cores on the xenhost",
            "number",
            allocation.total,
        ));
        match allocation.utilization_percent() {
            Some(percent) => gauges.push(gauge(
                "cpus_host_util",
                "Used cpu cores on the xenhost in percentage",
                "percentage",
                percent,
            )),
            None => warn!(
                host = %host,
                hostname = %hostname,
                "Host reports no physical CPUs, skipping utilization gauge"
            ),
        }
        gauges.push(gauge(
            "cpus_used",
            "Used cpu cores on the xenhost",
            "number",
            allocation.used,
        ));
        gauges.push(gauge(
            "cpus_free",
            "Free cpu cores on the xenhost",
            "number",
            allocation.free(),
        ));
        gauges.push(gauge(
            "vms_host_num",
            "Number of VMs resident on the xenhost",
            "number",
            allocation.vms,
        ));
    }
    Ok(gauges)
}

/// HA and workload-balancing configuration of every pool.
pub async fn pool(ctx: &BuildContext<'_>) -> Result<Vec<GaugeMetric>, XenError> {
    let pools = ctx.accessor.get_references("pool.get_all", None).await?;
    let mut gauges = Vec::with_capacity(pools.len() * POOL_GAUGES.len());

    for pool in &pools {
        let target = LabelTarget::new("pool", name_of(ctx, "pool.get_name_label", pool).await?);
        for field in POOL_GAUGES {
            gauges.push(build_field_gauge(ctx, field, pool, &target).await?);
        }
    }
    Ok(gauges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        xenapi::{test_utils::FakeXenApi, SessionManager},
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn accessor_for(api: Arc<FakeXenApi>) -> ValueAccessor {
        let sessions = SessionManager::with_transport(&Config::default(), api);
        ValueAccessor::new(sessions.session().await.unwrap(), Duration::from_secs(1))
    }

    #[test]
    fn utilization_uses_integer_division() {
        let half = CpuAllocation { total: 4, used: 2, vms: 1 };
        assert_eq!(half.utilization_percent(), Some(50));
        let third = CpuAllocation { total: 3, used: 1, vms: 1 };
        assert_eq!(third.utilization_percent(), Some(33));
        let over = CpuAllocation { total: 2, used: 6, vms: 3 };
        assert_eq!(over.utilization_percent(), Some(300));
        assert_eq!(over.free(), -4);
    }

    #[test]
    fn zero_cpus_has_no_utilization() {
        let empty = CpuAllocation { total: 0, used: 2, vms: 1 };
        assert_eq!(empty.utilization_percent(), None);
        assert_eq!(empty.free(), -2);
    }

    #[test]
    fn extreme_allocations_do_not_overflow() {
        let huge = CpuAllocation { total: 4, used: i64::MAX, vms: 1 };
        assert_eq!(huge.utilization_percent(), None);
        let negative = CpuAllocation { total: 4, used: i64::MIN, vms: 1 };
        assert_eq!(negative.free(), i64::MAX);
    }

    #[tokio::test]
    async fn hosts_sharing_a_name_are_labeled_by_reference() {
        let api = Arc::new(FakeXenApi::new());
        api.add_host("OpaqueRef:a", "xen1", "8589934592", "1");
        api.add_host("OpaqueRef:b", "xen1", "1024", "1");
        api.add_host("OpaqueRef:c", "xen2", "2048", "1");
        let accessor = accessor_for(api).await;
        let ctx = BuildContext {
            accessor: &accessor,
            namespace: "xen",
        };

        let hosts: Vec<ResourceRef> = vec!["OpaqueRef:a".into(), "OpaqueRef:b".into(), "OpaqueRef:c".into()];
        let names = hostnames(&ctx, &hosts).await.unwrap();
        assert_eq!(names, ["OpaqueRef:a", "OpaqueRef:b", "xen2"]);
    }

    #[test]
    fn blank_names_fall_back_to_the_reference() {
        let sr = ResourceRef::new("OpaqueRef:sr1");
        assert_eq!(display_name("  ".to_string(), &sr), "OpaqueRef:sr1");
        assert_eq!(display_name("Local storage".to_string(), &sr), "Local storage");
    }

    #[tokio::test]
    async fn field_gauge_carries_unit_and_target_labels() {
        let api = Arc::new(FakeXenApi::new());
        api.set("SR.get_physical_size", "OpaqueRef:sr1", json!("1073741824"));
        let accessor = accessor_for(api).await;
        let ctx = BuildContext {
            accessor: &accessor,
            namespace: "xen",
        };
        let target = LabelTarget::new("label", "Local storage".to_string())
            .with_const("default_storage", "true")
            .with_const("uuid", "abc");

        let gauge = build_field_gauge(&ctx, &STORAGE_GAUGES[2], &"OpaqueRef:sr1".into(), &target)
            .await
            .unwrap();

        assert_eq!(gauge.name(), "xen_storage_physical_size");
        assert_eq!(gauge.value(), 1073741824.0);
        assert_eq!(gauge.label(), ("label", "Local storage"));
        assert_eq!(gauge.label_value("unit"), Some("bytes"));
        assert_eq!(gauge.label_value("default_storage"), Some("true"));
        assert_eq!(gauge.label_value("uuid"), Some("abc"));
    }

    #[tokio::test]
    async fn flags_map_to_zero_and_one() {
        let api = Arc::new(FakeXenApi::new());
        api.add_pool("OpaqueRef:p", "pool-a", "OpaqueRef:NULL");
        api.set("pool.get_ha_enabled", "OpaqueRef:p", json!(true));
        api.set("pool.get_ha_host_failures_to_tolerate", "OpaqueRef:p", json!("2"));
        let accessor = accessor_for(api).await;
        let ctx = BuildContext {
            accessor: &accessor,
            namespace: "xen",
        };

        let gauges = pool(&ctx).await.unwrap();
        let values: Vec<(&str, f64)> = gauges.iter().map(|g| (g.name(), g.value())).collect();
        assert_eq!(
            values,
            vec![
                ("xen_pool_ha_enabled", 1.0),
                ("xen_pool_ha_host_failures_to_tolerate", 2.0),
                ("xen_pool_ha_allow_overcommit", 0.0),
                ("xen_pool_ha_overcommitted", 0.0),
                ("xen_pool_wlb_enabled", 0.0),
            ]
        );
        assert!(gauges.iter().all(|g| g.label() == ("pool", "pool-a")));
    }

    #[tokio::test]
    async fn non_numeric_field_is_a_coercion_error() {
        let api = Arc::new(FakeXenApi::new());
        api.add_host("OpaqueRef:h", "xen1", "lots", "4294967296");
        let accessor = accessor_for(api).await;
        let ctx = BuildContext {
            accessor: &accessor,
            namespace: "xen",
        };

        let err = host_memory(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            XenError::Coercion { ref method, expected: "integer", .. }
                if method == "host_metrics.get_memory_total"
        ));
    }
}
