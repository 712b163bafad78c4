#[path = "helpers/mod.rs"]
mod helpers;

use helpers::{single_host_pool, test_config};
use std::sync::Arc;
use std::time::Duration;
use xenstats_exporter::xenapi::{test_utils::FakeXenApi, SessionManager, XenError};

#[tokio::test]
async fn concurrent_first_use_logs_in_once() {
    let api = Arc::new(FakeXenApi::new());
    api.set_login_delay(Duration::from_millis(100));
    let sessions = Arc::new(SessionManager::with_transport(&test_config(), api.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sessions = sessions.clone();
        handles.push(tokio::spawn(async move { sessions.session().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(api.login_count(), 1);
    assert!(sessions.is_established());
}

#[tokio::test]
async fn session_is_not_established_until_first_use() {
    let api = Arc::new(FakeXenApi::new());
    let sessions = SessionManager::with_transport(&test_config(), api.clone());

    assert!(!sessions.is_established());
    assert_eq!(api.login_count(), 0);

    let session = sessions.session().await.unwrap();
    assert_eq!(session.host(), "pool-master.test");
    assert!(sessions.is_established());
}

#[tokio::test]
async fn rejected_credentials_surface_as_auth_error() {
    let api = Arc::new(FakeXenApi::new());
    api.reject_logins(true);
    let sessions = SessionManager::with_transport(&test_config(), api.clone());

    let err = sessions.session().await.unwrap_err();
    match &err {
        XenError::Auth { host, reason } => {
            assert_eq!(host, "pool-master.test");
            assert!(reason.contains("SESSION_AUTHENTICATION_FAILED"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_session_error());
    assert!(!sessions.is_established());
}

#[tokio::test]
async fn failed_login_is_retried_on_next_use() {
    let api = Arc::new(FakeXenApi::new());
    api.reject_logins(true);
    let sessions = SessionManager::with_transport(&test_config(), api.clone());

    assert!(sessions.session().await.is_err());
    api.reject_logins(false);
    assert!(sessions.session().await.is_ok());
    assert_eq!(api.login_count(), 2);
}

#[tokio::test]
async fn slow_login_times_out() {
    let api = Arc::new(FakeXenApi::new());
    api.set_login_delay(Duration::from_secs(5));
    let mut config = test_config();
    config.xenapi.call_timeout_ms = 50;
    let sessions = SessionManager::with_transport(&config, api);

    let err = sessions.session().await.unwrap_err();
    assert!(matches!(err, XenError::Auth { .. }), "{err:?}");
}

#[tokio::test]
async fn session_handle_is_sent_with_every_call() {
    let api = single_host_pool();
    let sessions = SessionManager::with_transport(&test_config(), api.clone());
    let session = sessions.session().await.unwrap();

    let hosts = session.call("host.get_all", &[]).await.unwrap();
    assert_eq!(hosts, serde_json::json!([helpers::XEN1]));
    assert_eq!(api.call_count("host.get_all"), 1);
}

#[tokio::test]
async fn logout_ends_an_established_session() {
    let api = Arc::new(FakeXenApi::new());
    let sessions = SessionManager::with_transport(&test_config(), api.clone());

    sessions.logout().await;
    assert_eq!(api.logout_count(), 0);

    sessions.session().await.unwrap();
    sessions.logout().await;
    assert_eq!(api.logout_count(), 1);
}
