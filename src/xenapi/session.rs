//! Lazily established, process-wide XenAPI session.

use crate::{
    config::{Config, Credentials},
    core::XenTransport,
    xenapi::{JsonRpcTransport, XenError},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const LOGIN_METHOD: &str = "session.login_with_password";
const LOGOUT_METHOD: &str = "session.logout";
const API_VERSION: &str = "1.0";

type TransportFactory =
    Box<dyn Fn() -> Result<Arc<dyn XenTransport>, XenError> + Send + Sync>;

/// An authenticated handle bound to one XenAPI endpoint.
pub struct Session {
    host: String,
    handle: String,
    transport: Arc<dyn XenTransport>,
}

impl Session {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Calls `method` on behalf of this session; the session handle is sent
    /// as the implicit first argument.
    pub async fn call(&self, method: &str, args: &[&str]) -> Result<serde_json::Value, XenError> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(self.handle.clone());
        params.extend(args.iter().map(|arg| arg.to_string()));
        self.transport
            .call(method, &params)
            .await
            .map_err(|e| e.with_reference(args.first().copied().unwrap_or_default()))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Owns the single session shared by every collection pass.
///
/// The session is created on first use and reused afterwards. Establishment
/// is single-flight: concurrent first callers wait on one login instead of
/// racing to create several sessions. A failed login leaves the manager empty
/// so that the next pass tries again. There is no renewal; a session the
/// server invalidates keeps failing until the process restarts.
pub struct SessionManager {
    host: String,
    credentials: Credentials,
    originator: String,
    call_timeout: Duration,
    transport_factory: TransportFactory,
    session: OnceCell<Arc<Session>>,
}

impl SessionManager {
    /// Creates a manager that talks JSON-RPC to the configured host.
    pub fn new(config: &Config) -> Self {
        let host = config.xenhost.clone();
        let xenapi = config.xenapi.clone();
        let factory_host = host.clone();
        Self {
            host,
            credentials: config.credentials.clone(),
            originator: config.xenapi.originator.clone(),
            call_timeout: config.xenapi.call_timeout(),
            transport_factory: Box::new(move || {
                let transport = JsonRpcTransport::new(&factory_host, &xenapi)?;
                Ok(Arc::new(transport) as Arc<dyn XenTransport>)
            }),
            session: OnceCell::new(),
        }
    }

    /// Creates a manager on top of an existing transport.
    pub fn with_transport(config: &Config, transport: Arc<dyn XenTransport>) -> Self {
        Self {
            host: config.xenhost.clone(),
            credentials: config.credentials.clone(),
            originator: config.xenapi.originator.clone(),
            call_timeout: config.xenapi.call_timeout(),
            transport_factory: Box::new(move || Ok(transport.clone())),
            session: OnceCell::new(),
        }
    }

    /// Returns the shared session, logging in first if there is none yet.
    pub async fn session(&self) -> Result<Arc<Session>, XenError> {
        self.session.get_or_try_init(|| self.login()).await.cloned()
    }

    /// Returns `true` once a login has succeeded.
    pub fn is_established(&self) -> bool {
        self.session.initialized()
    }

    async fn login(&self) -> Result<Arc<Session>, XenError> {
        let transport = (self.transport_factory)()?;
        debug!(host = %self.host, "Logging in to XenAPI");

        let params = [
            self.credentials.username.clone(),
            self.credentials.password.clone(),
            API_VERSION.to_string(),
            self.originator.clone(),
        ];
        let auth_err = |reason: String| XenError::Auth {
            host: self.host.clone(),
            reason,
        };

        let result = tokio::time::timeout(self.call_timeout, transport.call(LOGIN_METHOD, &params))
            .await
            .map_err(|_| auth_err(format!("no response within {}ms", self.call_timeout.as_millis())))?
            .map_err(|e| auth_err(e.to_string()))?;

        let handle = match result {
            serde_json::Value::String(handle) if !handle.is_empty() => handle,
            other => return Err(auth_err(format!("unexpected login result {other}"))),
        };

        metrics::counter!("xenstats_exporter_session_logins_total").increment(1);
        info!(host = %self.host, "XenAPI session established");
        Ok(Arc::new(Session {
            host: self.host.clone(),
            handle,
            transport,
        }))
    }

    /// Ends the session, if one was established. Failures are only logged.
    pub async fn logout(&self) {
        let Some(session) = self.session.get() else {
            return;
        };
        let logout = tokio::time::timeout(self.call_timeout, session.call(LOGOUT_METHOD, &[]));
        match logout.await {
            Ok(Ok(_)) => info!(host = %self.host, "XenAPI session closed"),
            Ok(Err(e)) => warn!(host = %self.host, error = %e, "XenAPI logout failed"),
            Err(_) => warn!(host = %self.host, "XenAPI logout timed out"),
        }
    }
}
