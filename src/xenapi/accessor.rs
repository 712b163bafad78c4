use crate::{
    core::ResourceRef,
    xenapi::{Session, Value, XenError},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Issues field and collection lookups against a session and decodes the
/// results into typed values.
///
/// Every lookup is a network round trip bounded by `call_timeout`. Nothing is
/// memoized. Dropping a pending lookup cancels the underlying request.
#[derive(Debug, Clone)]
pub struct ValueAccessor {
    session: Arc<Session>,
    call_timeout: Duration,
}

impl ValueAccessor {
    pub fn new(session: Arc<Session>, call_timeout: Duration) -> Self {
        Self {
            session,
            call_timeout,
        }
    }

    /// Looks up a single field of `resource`, e.g. `host.get_name_label`.
    pub async fn get_field(&self, method: &str, resource: &ResourceRef) -> Result<Value, XenError> {
        self.invoke(method, Some(resource)).await
    }

    /// Enumerates references, either all instances of a class (`scope` is
    /// `None`, e.g. `SR.get_all`) or those related to one resource
    /// (e.g. `host.get_resident_VMs`).
    pub async fn get_references(
        &self,
        method: &str,
        scope: Option<&ResourceRef>,
    ) -> Result<Vec<ResourceRef>, XenError> {
        let value = self.invoke(method, scope).await?;
        value
            .into_references()
            .map_err(|found| coercion(method, scope, "list of references", found))
    }

    pub async fn get_string(&self, method: &str, resource: &ResourceRef) -> Result<String, XenError> {
        self.get_field(method, resource)
            .await?
            .into_string()
            .map_err(|found| coercion(method, Some(resource), "string", found))
    }

    pub async fn get_i64(&self, method: &str, resource: &ResourceRef) -> Result<i64, XenError> {
        self.get_field(method, resource)
            .await?
            .into_i64()
            .map_err(|found| coercion(method, Some(resource), "integer", found))
    }

    pub async fn get_bool(&self, method: &str, resource: &ResourceRef) -> Result<bool, XenError> {
        self.get_field(method, resource)
            .await?
            .into_bool()
            .map_err(|found| coercion(method, Some(resource), "boolean", found))
    }

    /// Looks up a field holding a single reference, e.g. `host.get_metrics`.
    pub async fn get_reference(
        &self,
        method: &str,
        resource: &ResourceRef,
    ) -> Result<ResourceRef, XenError> {
        self.get_field(method, resource)
            .await?
            .into_string()
            .map(ResourceRef::new)
            .map_err(|found| coercion(method, Some(resource), "reference", found))
    }

    async fn invoke(&self, method: &str, scope: Option<&ResourceRef>) -> Result<Value, XenError> {
        let args: Vec<&str> = scope.map(|r| r.as_str()).into_iter().collect();
        trace!(method, reference = ?scope.map(|r| r.as_str()), "XenAPI lookup");

        let raw = tokio::time::timeout(self.call_timeout, self.session.call(method, &args))
            .await
            .map_err(|_| XenError::Timeout {
                method: method.to_string(),
                reference: reference_of(scope),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })??;

        Value::decode(raw).map_err(|found| coercion(method, scope, "a XenAPI value", found))
    }
}

fn coercion(
    method: &str,
    scope: Option<&ResourceRef>,
    expected: &'static str,
    found: String,
) -> XenError {
    XenError::Coercion {
        method: method.to_string(),
        reference: reference_of(scope),
        expected,
        found,
    }
}

fn reference_of(scope: Option<&ResourceRef>) -> String {
    scope.map(|r| r.to_string()).unwrap_or_default()
}
