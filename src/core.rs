//! Core domain types and service traits for the exporter
//!
//! This module defines the data structures that flow through the collection
//! pipeline and the trait contract that separates it from the remote API.

use crate::xenapi::XenError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque server-side handle naming a XenAPI object (host, SR, pool, VM...).
///
/// The exporter never inspects its contents; it is only ever passed back to
/// the remote API to resolve fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef(String);

impl ResourceRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A single labeled gauge observation produced by a collection pass.
///
/// Gauges are immutable once built: the orchestrator only appends them to the
/// result set and the exposition layer only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeMetric {
    name: String,
    help: &'static str,
    const_labels: Vec<(String, String)>,
    label: (String, String),
    value: f64,
}

impl GaugeMetric {
    /// Builds a gauge named `<namespace>_<name>`.
    pub fn new(
        namespace: &str,
        name: &str,
        help: &'static str,
        const_labels: Vec<(String, String)>,
        label: (&str, &str),
        value: f64,
    ) -> Self {
        let name = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}_{name}")
        };
        Self {
            name,
            help,
            const_labels,
            label: (label.0.to_string(), label.1.to_string()),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn const_labels(&self) -> &[(String, String)] {
        &self.const_labels
    }

    /// The variable label as a `(key, value)` pair, e.g. `("hostname", "xen1")`.
    pub fn label(&self) -> (&str, &str) {
        (&self.label.0, &self.label.1)
    }

    /// Looks up any label, constant or variable, by key.
    pub fn label_value(&self, key: &str) -> Option<&str> {
        if self.label.0 == key {
            return Some(&self.label.1);
        }
        self.const_labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Carries one request/response exchange with the XenAPI endpoint.
#[async_trait]
pub trait XenTransport: Send + Sync {
    /// Invokes `method` with ordered string arguments.
    ///
    /// # Returns
    /// * `Ok(value)` with the raw, undecoded result on success
    /// * `Err(XenError::Fault)` when the server rejected the call
    /// * `Err(XenError::Transport)` when the request could not be completed
    async fn call(&self, method: &str, args: &[String]) -> Result<serde_json::Value, XenError>;
}
