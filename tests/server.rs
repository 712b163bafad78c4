#[path = "helpers/mod.rs"]
mod helpers;

use helpers::{single_host_pool, test_config, TestApp};
use std::time::Duration;

#[tokio::test]
async fn scrape_returns_xen_gauges_in_text_format() {
    let app = TestApp::start(single_host_pool(), test_config()).await.unwrap();

    let response = reqwest::get(app.url("/metrics")).await.unwrap();
    assert!(response.status().is_success());
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"), "{content_type}");

    let body = response.text().await.unwrap();
    assert!(body.contains("# HELP xenstats_memory_total Total memory of the xen host"));
    assert!(body.contains("# TYPE xenstats_memory_total gauge"));
    let memory_line = body
        .lines()
        .find(|line| line.starts_with("xenstats_memory_total{"))
        .unwrap();
    assert!(memory_line.contains(r#"hostname="xen1""#), "{memory_line}");
    assert!(memory_line.contains(r#"unit="bytes""#), "{memory_line}");
    assert!(body.contains("xenstats_cpus_host_util{"));
    assert!(body.contains("xenstats_storage_physical_size{"));
    assert!(body.contains("xenstats_pool_ha_enabled{"));

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn each_scrape_runs_a_fresh_pass() {
    let app = TestApp::start(single_host_pool(), test_config()).await.unwrap();

    reqwest::get(app.url("/metrics")).await.unwrap();
    reqwest::get(app.url("/metrics")).await.unwrap();

    assert_eq!(app.api.call_count("host.get_all"), 4);
    assert_eq!(app.api.login_count(), 1);

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn failed_family_is_absent_from_the_scrape() {
    let api = single_host_pool();
    api.fail("SR.get_all", "", "PERMISSION_DENIED");
    let app = TestApp::start(api, test_config()).await.unwrap();

    let body = reqwest::get(app.url("/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!body.contains("xenstats_storage_"));
    assert!(body.contains("xenstats_memory_total{"));

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn landing_page_links_to_metrics() {
    let mut config = test_config();
    config.server.metrics_path = "/xen-metrics".to_string();
    let app = TestApp::start(single_host_pool(), config).await.unwrap();

    let body = reqwest::get(app.url("/")).await.unwrap().text().await.unwrap();
    assert!(body.contains("Xenstats Exporter"));
    assert!(body.contains(r#"href="/xen-metrics""#));

    let scrape = reqwest::get(app.url("/xen-metrics")).await.unwrap();
    assert!(scrape.status().is_success());

    let missing = reqwest::get(app.url("/metrics")).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn no_login_happens_before_the_first_scrape() {
    let api = single_host_pool();
    let app = TestApp::start(api.clone(), test_config()).await.unwrap();
    assert_eq!(api.login_count(), 0);

    app.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(api.logout_count(), 0);
}

#[tokio::test]
async fn shutdown_logs_out_of_an_established_session() {
    let api = single_host_pool();
    let app = TestApp::start(api.clone(), test_config()).await.unwrap();
    reqwest::get(app.url("/metrics")).await.unwrap();

    app.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(api.logout_count(), 1);
}
