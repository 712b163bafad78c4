use crate::{config::XenApiConfig, core::XenTransport, xenapi::XenError};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// XenAPI transport speaking JSON-RPC 2.0 over HTTPS (`POST /jsonrpc`).
pub struct JsonRpcTransport {
    client: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl JsonRpcTransport {
    /// Builds a transport for `host`, which may be a bare address
    /// (`10.0.0.10`, `xen1:8443`) or a full URL.
    pub fn new(host: &str, config: &XenApiConfig) -> Result<Self, XenError> {
        let url = endpoint_url(host)?;
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.call_timeout())
            .build()
            .map_err(|e| XenError::Endpoint {
                endpoint: host.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Resolves the JSON-RPC URL for a configured host.
pub fn endpoint_url(host: &str) -> Result<Url, XenError> {
    let invalid = |reason: String| XenError::Endpoint {
        endpoint: host.to_string(),
        reason,
    };

    let host = host.trim();
    if host.is_empty() {
        return Err(invalid("no host configured".to_string()));
    }
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };

    let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("missing host name".to_string()));
    }
    if url.path() == "/" || url.path().is_empty() {
        url.set_path("/jsonrpc");
    }
    Ok(url)
}

#[async_trait]
impl XenTransport for JsonRpcTransport {
    async fn call(&self, method: &str, args: &[String]) -> Result<serde_json::Value, XenError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": args,
            "id": id,
        });
        trace!(method, id, "Sending XenAPI request");

        let transport_err = |reason: String| XenError::Transport {
            method: method.to_string(),
            reference: String::new(),
            reason,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_err(format!("HTTP status {status}")));
        }

        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| transport_err(format!("malformed response: {e}")))?;

        if let Some(error) = response.error {
            return Err(XenError::Fault {
                method: method.to_string(),
                reference: String::new(),
                fault: describe_fault(&error.message, error.data.as_ref()),
            });
        }

        unwrap_status(method, response.result.unwrap_or(serde_json::Value::Null))
    }
}

/// Unwraps the `{"Status": ..., "Value": ...}` envelope older XAPI builds
/// still put inside the JSON-RPC result.
fn unwrap_status(method: &str, result: serde_json::Value) -> Result<serde_json::Value, XenError> {
    let serde_json::Value::Object(mut envelope) = result else {
        return Ok(result);
    };
    match envelope.get("Status").and_then(|s| s.as_str()) {
        Some("Success") => Ok(envelope.remove("Value").unwrap_or(serde_json::Value::Null)),
        Some(_) => Err(XenError::Fault {
            method: method.to_string(),
            reference: String::new(),
            fault: describe_fault("", envelope.get("ErrorDescription")),
        }),
        None => Ok(serde_json::Value::Object(envelope)),
    }
}

fn describe_fault(message: &str, data: Option<&serde_json::Value>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !message.is_empty() {
        parts.push(message.to_string());
    }
    match data {
        Some(serde_json::Value::Array(items)) => parts.extend(items.iter().map(|item| match item {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        Some(serde_json::Value::Null) | None => {}
        Some(other) => parts.push(other.to_string()),
    }
    // XAPI repeats the error code as the first data element.
    parts.dedup();
    if parts.is_empty() {
        "unknown fault".to_string()
    } else {
        parts.join(", ")
    }
}
