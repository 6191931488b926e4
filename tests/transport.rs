mod common;

use std::time::Duration;

use httpmock::Method::GET;
use serde_json::Value;

use ledgerkit_http::{ErrorCategory, RequestOptions};

#[tokio::test]
async fn completed_requests_leave_idle_sockets_until_closed() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/v1/ledgers");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"items":[]}"#);
    });

    let client = common::client_for(&server);
    for _ in 0..3 {
        let _: Value = client
            .get("onboarding/ledgers", RequestOptions::new())
            .await
            .unwrap();
    }

    let stats = client.connection_stats();
    assert_eq!(stats.plain.active, 0);
    assert!(stats.plain.idle >= 1);
    assert_eq!(stats.plain.total, stats.plain.idle);
    assert_eq!(stats.secure.total, 0);

    let closed = client.close_idle_connections().await;
    assert_eq!(closed, stats.plain.idle);
    let after = client.connection_stats();
    assert_eq!(after.plain.total, 0);
}

#[tokio::test]
async fn concurrent_requests_settle_within_the_socket_ceiling() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/balances");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"items":[]}"#)
            .delay(Duration::from_millis(100));
    });

    let client = common::builder_for(&server)
        .max_sockets_per_host(5)
        .build()
        .unwrap();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let worker = client.clone();
        handles.push(tokio::spawn(async move {
            worker
                .get::<Value>("onboarding/balances", RequestOptions::new())
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(mock.hits(), 8);
    let stats = client.connection_stats();
    assert_eq!(stats.plain.active, 0);
    assert!(stats.plain.idle >= 1, "completed requests leave idle slots");
    assert!(stats.plain.idle <= 5, "idle count must respect the ceiling");
    assert_eq!(stats.plain.total, stats.plain.idle);

    let closed = client.close_idle_connections().await;
    assert_eq!(closed, stats.plain.idle);
    assert_eq!(client.connection_stats().plain.total, 0);
}

#[tokio::test]
async fn aborted_requests_do_not_leak_active_slots() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/v1/slow");
        then.status(200)
            .header("content-type", "application/json")
            .body("{}")
            .delay(Duration::from_secs(2));
    });

    let client = common::client_for(&server);
    let worker = client.clone();
    let handle = tokio::spawn(async move {
        let _: Result<Value, _> = worker.get("onboarding/slow", RequestOptions::new()).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.connection_stats().plain.active, 1);

    handle.abort();
    let _ = handle.await;

    let stats = client.connection_stats();
    assert_eq!(stats.plain.active, 0, "aborted attempt must settle its slot");
    assert_eq!(stats.plain.idle, 0, "an abandoned socket is not reusable");
    assert_eq!(stats.plain.total, 0);
}

#[tokio::test]
async fn requests_still_work_after_closing_idle_connections() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/accounts");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"items":[]}"#);
    });

    let client = common::client_for(&server);
    let _: Value = client
        .get("onboarding/accounts", RequestOptions::new())
        .await
        .unwrap();
    client.close_idle_connections().await;
    let _: Value = client
        .get("onboarding/accounts", RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(mock.hits(), 2);
}

#[tokio::test]
async fn destroyed_client_fails_fast_without_a_network_call() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/ledgers");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"items":[]}"#);
    });

    let client = common::client_for(&server);
    client.destroy().await;

    let error = client
        .get::<Value>("onboarding/ledgers", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Internal);
    assert_eq!(mock.hits(), 0);
}
