//! XenAPI client plumbing: transport, session lifecycle and typed field access.

pub mod accessor;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use accessor::ValueAccessor;
pub use session::{Session, SessionManager};
pub use transport::JsonRpcTransport;

use crate::core::ResourceRef;
use thiserror::Error;

/// Errors raised while talking to a XenAPI endpoint.
///
/// `Endpoint` and `Auth` concern the session itself and end the whole
/// collection pass. Every other variant is scoped to the lookup that raised it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum XenError {
    #[error("invalid XenAPI endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("login to {host} failed: {reason}")]
    Auth { host: String, reason: String },

    #[error("{method}({reference}) could not be sent: {reason}")]
    Transport {
        method: String,
        reference: String,
        reason: String,
    },

    #[error("{method}({reference}) returned fault: {fault}")]
    Fault {
        method: String,
        reference: String,
        fault: String,
    },

    #[error("{method}({reference}) returned {found}, expected {expected}")]
    Coercion {
        method: String,
        reference: String,
        expected: &'static str,
        found: String,
    },

    #[error("{method}({reference}) timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        reference: String,
        timeout_ms: u64,
    },
}

impl XenError {
    /// Returns `true` for failures of the session itself rather than of a lookup.
    pub fn is_session_error(&self) -> bool {
        matches!(self, XenError::Endpoint { .. } | XenError::Auth { .. })
    }

    /// Attaches the resource reference a call was scoped to.
    pub(crate) fn with_reference(self, scope: &str) -> Self {
        match self {
            XenError::Transport { method, reason, .. } => XenError::Transport {
                method,
                reference: scope.to_string(),
                reason,
            },
            XenError::Fault { method, fault, .. } => XenError::Fault {
                method,
                reference: scope.to_string(),
                fault,
            },
            other => other,
        }
    }
}

/// A decoded XenAPI field value.
///
/// Raw results are converted into this closed set once, at the accessor
/// boundary. Consumers state the type they expect through the `into_*`
/// methods; a mismatch is reported as the description of what was found.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    References(Vec<ResourceRef>),
}

impl Value {
    /// Decodes a raw JSON-RPC result.
    pub fn decode(raw: serde_json::Value) -> Result<Self, String> {
        match raw {
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("non-integer number {n}")),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(ResourceRef::new(s)),
                    other => Err(format!("list containing {}", json_kind(&other))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::References),
            other => Err(json_kind(&other).to_string()),
        }
    }

    fn kind(&self) -> String {
        match self {
            Value::String(s) => format!("string {s:?}"),
            Value::Int(i) => format!("integer {i}"),
            Value::Bool(b) => format!("boolean {b}"),
            Value::References(refs) => format!("list of {} references", refs.len()),
        }
    }

    pub fn into_string(self) -> Result<String, String> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.kind()),
        }
    }

    /// Accepts native integers and base-10 string-encoded integers, the
    /// convention XenAPI uses for `int64` fields.
    pub fn into_i64(self) -> Result<i64, String> {
        match self {
            Value::Int(i) => Ok(i),
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| format!("string {s:?}")),
            other => Err(other.kind()),
        }
    }

    pub fn into_bool(self) -> Result<bool, String> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(other.kind()),
        }
    }

    pub fn into_references(self) -> Result<Vec<ResourceRef>, String> {
        match self {
            Value::References(refs) => Ok(refs),
            other => Err(other.kind()),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_the_closed_value_set() {
        assert_eq!(Value::decode(json!("abc")).unwrap(), Value::String("abc".into()));
        assert_eq!(Value::decode(json!(42)).unwrap(), Value::Int(42));
        assert_eq!(Value::decode(json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(
            Value::decode(json!(["OpaqueRef:a", "OpaqueRef:b"])).unwrap(),
            Value::References(vec!["OpaqueRef:a".into(), "OpaqueRef:b".into()])
        );
        assert_eq!(Value::decode(json!([])).unwrap(), Value::References(vec![]));
    }

    #[test]
    fn rejects_shapes_outside_the_value_set() {
        assert_eq!(Value::decode(json!(null)).unwrap_err(), "null");
        assert_eq!(Value::decode(json!({"a": 1})).unwrap_err(), "object");
        assert_eq!(Value::decode(json!(1.5)).unwrap_err(), "non-integer number 1.5");
        assert_eq!(
            Value::decode(json!(["OpaqueRef:a", 3])).unwrap_err(),
            "list containing number"
        );
    }

    #[test]
    fn string_encoded_integers_parse_base_10() {
        for n in [0_i64, 1, 4294967296, 8589934592, -12, i64::MAX] {
            assert_eq!(Value::String(n.to_string()).into_i64().unwrap(), n);
        }
        assert_eq!(
            Value::String("12GB".into()).into_i64().unwrap_err(),
            "string \"12GB\""
        );
    }

    #[test]
    fn wrong_type_access_is_an_error() {
        assert!(Value::Int(1).into_bool().is_err());
        assert!(Value::Bool(true).into_i64().is_err());
        assert!(Value::String("true".into()).into_bool().is_err());
        assert!(Value::String("OpaqueRef:a".into()).into_references().is_err());
    }

    #[test]
    fn session_errors_are_classified() {
        let auth = XenError::Auth {
            host: "xen1".into(),
            reason: "denied".into(),
        };
        let fault = XenError::Fault {
            method: "host.get_all".into(),
            reference: String::new(),
            fault: "HANDLE_INVALID".into(),
        };
        assert!(auth.is_session_error());
        assert!(!fault.is_session_error());
        assert_eq!(
            fault.with_reference("OpaqueRef:h").to_string(),
            "host.get_all(OpaqueRef:h) returned fault: HANDLE_INVALID"
        );
    }
}
