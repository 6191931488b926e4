mod common;

use std::time::Duration;

use httpmock::Method::{GET, POST};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use ledgerkit_http::{Backoff, ErrorCategory, RequestOptions, RetryConfig};

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        backoff: Backoff::Fixed(Duration::from_millis(1)),
        ..RetryConfig::default()
    }
}

#[tokio::test]
async fn persistent_503_exhausts_every_attempt() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/ledgers");
        then.status(503)
            .header("content-type", "application/json")
            .body(r#"{"error":"overloaded"}"#);
    });

    let client = common::builder_for(&server)
        .retry(fast_retry(3))
        .build()
        .unwrap();
    let error = client
        .get::<Value>("onboarding/ledgers", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 4);
    assert!(error.retried());
    assert_eq!(error.retry_count(), 3);
    assert_eq!(error.status(), Some(503));
    assert_eq!(error.code(), "internal_server_error");
}

#[tokio::test]
async fn validation_errors_are_not_retried() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/transactions");
        then.status(400)
            .header("content-type", "application/json")
            .body(r#"{"error":"amount must be positive"}"#);
    });

    let client = common::builder_for(&server)
        .retry(fast_retry(3))
        .build()
        .unwrap();
    let error = client
        .post::<Value, _>(
            "transaction/transactions",
            &json!({"amount": -1}),
            RequestOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 1);
    assert!(!error.retried());
    assert_eq!(error.category(), ErrorCategory::Validation);
    assert_eq!(error.code(), "validation_error");
}

#[tokio::test]
async fn rate_limiting_is_retried_by_default() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/accounts");
        then.status(429)
            .header("content-type", "application/json")
            .body(r#"{"error":"slow down"}"#);
    });

    let client = common::builder_for(&server)
        .retry(fast_retry(1))
        .build()
        .unwrap();
    let error = client
        .get::<Value>("onboarding/accounts", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 2);
    assert_eq!(error.category(), ErrorCategory::RateLimit);
    assert!(error.retried());
}

#[tokio::test]
async fn per_request_override_wins_over_client_retry() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/ledgers");
        then.status(503)
            .header("content-type", "application/json")
            .body(r#"{"error":"overloaded"}"#);
    });

    let client = common::builder_for(&server)
        .retry(fast_retry(3))
        .build()
        .unwrap();
    let error = client
        .get::<Value>(
            "onboarding/ledgers",
            RequestOptions::new().retry(RetryConfig::disabled()),
        )
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 1);
    assert!(!error.retried());
}

#[tokio::test]
async fn timeout_maps_to_its_category_when_retries_are_off() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/v1/slow");
        then.status(200)
            .header("content-type", "application/json")
            .body("{}")
            .delay(Duration::from_millis(500));
    });

    let client = common::builder_for(&server)
        .retry(RetryConfig::disabled())
        .build()
        .unwrap();
    let error = client
        .get::<Value>(
            "onboarding/slow",
            RequestOptions::new().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Timeout);
    assert_eq!(error.code(), "timeout");
    assert!(!error.retried());
}

#[tokio::test]
async fn cancellation_aborts_an_in_flight_attempt() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/v1/slow");
        then.status(200)
            .header("content-type", "application/json")
            .body("{}")
            .delay(Duration::from_secs(5));
    });

    let client = common::client_for(&server);
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let error = client
        .get::<Value>("onboarding/slow", RequestOptions::new().cancel(token))
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(error.category(), ErrorCategory::Cancelled);
}

#[tokio::test]
async fn connection_refused_is_a_retried_network_error() {
    // Port 9 is the discard service; nothing is listening there.
    let client = ledgerkit_http::LedgerClient::builder()
        .default_base_url(url::Url::parse("http://127.0.0.1:9/v1").unwrap())
        .retry(fast_retry(2))
        .build()
        .unwrap();

    let error = client
        .get::<Value>("ledgers", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Network);
    assert_eq!(error.code(), "network_error");
    assert!(error.retried());
    assert_eq!(error.retry_count(), 2);
}
