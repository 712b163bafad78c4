use crate::{core::XenTransport, xenapi::XenError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Session handle handed out by [`FakeXenApi`].
pub const FAKE_SESSION: &str = "OpaqueRef:fake-session";

#[derive(Clone)]
struct Reply {
    result: Result<Value, String>,
    delay: Option<Duration>,
}

/// In-memory XenAPI for testing.
///
/// Replies are keyed by method name and the first argument after the session
/// handle (empty for class-wide calls such as `host.get_all`). String-encoded
/// integers are used for numeric fields, as a real pool returns them.
pub struct FakeXenApi {
    replies: Mutex<HashMap<(String, String), Reply>>,
    calls: Mutex<HashMap<String, u32>>,
    logins: AtomicU32,
    logouts: AtomicU32,
    login_delay: Mutex<Duration>,
    reject_login: AtomicBool,
}

impl Default for FakeXenApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeXenApi {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            logins: AtomicU32::new(0),
            logouts: AtomicU32::new(0),
            login_delay: Mutex::new(Duration::ZERO),
            reject_login: AtomicBool::new(false),
        }
    }

    /// Sets the reply for `method(arg)`.
    pub fn set(&self, method: &str, arg: &str, value: Value) {
        self.insert(method, arg, Ok(value));
    }

    /// Makes `method(arg)` fail with a XenAPI fault.
    pub fn fail(&self, method: &str, arg: &str, fault: &str) {
        self.insert(method, arg, Err(fault.to_string()));
    }

    /// Delays the reply to `method(arg)`.
    pub fn delay(&self, method: &str, arg: &str, delay: Duration) {
        let mut replies = self.replies.lock().unwrap();
        let reply = replies
            .entry((method.to_string(), arg.to_string()))
            .or_insert(Reply {
                result: Ok(Value::Null),
                delay: None,
            });
        reply.delay = Some(delay);
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.login_delay.lock().unwrap() = delay;
    }

    pub fn reject_logins(&self, reject: bool) {
        self.reject_login.store(reject, Ordering::SeqCst);
    }

    /// Number of `session.login_with_password` calls received.
    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Number of times `method` was called, across all arguments.
    pub fn call_count(&self, method: &str) -> u32 {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    /// Registers a host with its metrics object. The host starts with no
    /// physical CPUs and no resident VMs.
    pub fn add_host(&self, host: &str, name: &str, memory_total: &str, memory_free: &str) {
        let metrics = format!("{host}-metrics");
        self.push_reference("host.get_all", "", host);
        self.set("host.get_name_label", host, json!(name));
        self.set("host.get_metrics", host, json!(metrics));
        self.set("host_metrics.get_memory_total", &metrics, json!(memory_total));
        self.set("host_metrics.get_memory_free", &metrics, json!(memory_free));
        self.set("host.get_host_CPUs", host, json!([]));
        self.set("host.get_resident_VMs", host, json!([]));
    }

    pub fn set_host_cpus(&self, host: &str, count: usize) {
        let cpus: Vec<String> = (0..count).map(|i| format!("{host}-cpu{i}")).collect();
        self.set("host.get_host_CPUs", host, json!(cpus));
    }

    /// Places a VM with `vcpus` virtual CPUs on `host`.
    pub fn add_resident_vm(&self, host: &str, vm: &str, vcpus: &str) {
        let metrics = format!("{vm}-metrics");
        self.push_reference("host.get_resident_VMs", host, vm);
        self.set("VM.get_metrics", vm, json!(metrics));
        self.set("VM_metrics.get_VCPUs_number", &metrics, json!(vcpus));
    }

    pub fn add_storage(
        &self,
        sr: &str,
        name: &str,
        uuid: &str,
        virtual_allocation: &str,
        physical_utilisation: &str,
        physical_size: &str,
    ) {
        self.push_reference("SR.get_all", "", sr);
        self.set("SR.get_name_label", sr, json!(name));
        self.set("SR.get_uuid", sr, json!(uuid));
        self.set("SR.get_virtual_allocation", sr, json!(virtual_allocation));
        self.set("SR.get_physical_utilisation", sr, json!(physical_utilisation));
        self.set("SR.get_physical_size", sr, json!(physical_size));
    }

    /// Registers a pool with HA and WLB disabled.
    pub fn add_pool(&self, pool: &str, name: &str, default_sr: &str) {
        self.push_reference("pool.get_all", "", pool);
        self.set("pool.get_name_label", pool, json!(name));
        self.set("pool.get_default_SR", pool, json!(default_sr));
        self.set("pool.get_ha_enabled", pool, json!(false));
        self.set("pool.get_ha_host_failures_to_tolerate", pool, json!("0"));
        self.set("pool.get_ha_allow_overcommit", pool, json!(false));
        self.set("pool.get_ha_overcommitted", pool, json!(false));
        self.set("pool.get_wlb_enabled", pool, json!(false));
    }

    fn insert(&self, method: &str, arg: &str, result: Result<Value, String>) {
        let mut replies = self.replies.lock().unwrap();
        let reply = replies
            .entry((method.to_string(), arg.to_string()))
            .or_insert(Reply {
                result: Ok(Value::Null),
                delay: None,
            });
        reply.result = result;
    }

    fn push_reference(&self, method: &str, arg: &str, reference: &str) {
        let mut replies = self.replies.lock().unwrap();
        let reply = replies
            .entry((method.to_string(), arg.to_string()))
            .or_insert(Reply {
                result: Ok(json!([])),
                delay: None,
            });
        match &mut reply.result {
            Ok(Value::Array(items)) => items.push(json!(reference)),
            other => *other = Ok(json!([reference])),
        }
    }

    fn fault(method: &str, fault: &str) -> XenError {
        XenError::Fault {
            method: method.to_string(),
            reference: String::new(),
            fault: fault.to_string(),
        }
    }
}

#[async_trait]
impl XenTransport for FakeXenApi {
    async fn call(&self, method: &str, args: &[String]) -> Result<Value, XenError> {
        *self.calls.lock().unwrap().entry(method.to_string()).or_insert(0) += 1;

        match method {
            "session.login_with_password" => {
                self.logins.fetch_add(1, Ordering::SeqCst);
                let delay = *self.login_delay.lock().unwrap();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if self.reject_login.load(Ordering::SeqCst) {
                    return Err(Self::fault(method, "SESSION_AUTHENTICATION_FAILED"));
                }
                return Ok(json!(FAKE_SESSION));
            }
            "session.logout" => {
                self.logouts.fetch_add(1, Ordering::SeqCst);
                return Ok(Value::Null);
            }
            _ => {}
        }

        if args.first().map(String::as_str) != Some(FAKE_SESSION) {
            return Err(Self::fault(method, "SESSION_INVALID"));
        }

        let key = (
            method.to_string(),
            args.get(1).cloned().unwrap_or_default(),
        );
        let reply = self.replies.lock().unwrap().get(&key).cloned();
        let Some(reply) = reply else {
            return Err(Self::fault(method, "HANDLE_INVALID"));
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result.map_err(|fault| Self::fault(method, &fault))
    }
}
