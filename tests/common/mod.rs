#![allow(dead_code)]

use httpmock::MockServer;
use ledgerkit_http::{LedgerClient, LedgerClientBuilder};
use url::Url;

pub fn setup_server() -> MockServer {
    MockServer::start()
}

pub fn base(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}{path}", server.base_url())).unwrap()
}

/// Builder preconfigured with an `onboarding` base, a default base, and a
/// test API key pointed at the mock server.
pub fn builder_for(server: &MockServer) -> LedgerClientBuilder {
    LedgerClient::builder()
        .base_url("onboarding", base(server, "/v1"))
        .base_url("transaction", base(server, "/v1"))
        .default_base_url(base(server, "/v1"))
        .api_key("sk_test_123")
}

pub fn client_for(server: &MockServer) -> LedgerClient {
    builder_for(server).build().unwrap()
}
