//! Test app state builder for HTTP-level testing.
//!
//! `TestAppStateBuilder` wraps a `SubscriptionHarness` so route tests can seed retailers and
//! inspect the in-memory ledger through the same handles the `AppState` is built from.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use secrecy::SecretString;
use url::Url;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    application::jwt,
    infra::config::AppConfig,
    test_utils::{
        SubscriptionHarness, TEST_CRON_SECRET, TEST_JWT_SECRET, TEST_WEBHOOK_SECRET,
        test_price_table,
    },
};

pub fn test_app_config() -> AppConfig {
    AppConfig {
        jwt_secret: SecretString::new(TEST_JWT_SECRET.into()),
        gateway_secret_key: SecretString::new("sk_test_unused".into()),
        gateway_webhook_secret: SecretString::new(TEST_WEBHOOK_SECRET.into()),
        cron_secret: SecretString::new(TEST_CRON_SECRET.into()),
        gateway_api_base: Url::parse("http://localhost:12111/v1/").unwrap(),
        gateway_timeout: Duration::from_millis(100),
        ledger_retry_delay: Duration::from_millis(1),
        cors_origin: HeaderValue::from_static("http://localhost:3000"),
        bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
        database_url: String::new(),
        prices: Arc::new(test_price_table()),
    }
}

/// Token as the managed auth backend would issue it.
pub fn test_access_token(retailer_id: Uuid, role: Option<&str>) -> String {
    jwt::issue(
        retailer_id,
        role,
        &SecretString::new(TEST_JWT_SECRET.into()),
        time::Duration::hours(1),
    )
    .unwrap()
}

/// Builder for creating test `AppState` instances backed by in-memory mocks.
///
/// # Example
///
/// ```ignore
/// let builder = TestAppStateBuilder::new();
/// let retailer = builder.harness.add_retailer(PlanTier::Basic);
/// let server = TestServer::new(router().with_state(builder.build())).unwrap();
/// ```
pub struct TestAppStateBuilder {
    pub harness: SubscriptionHarness,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            harness: SubscriptionHarness::new(),
        }
    }

    pub fn build(&self) -> AppState {
        AppState {
            config: Arc::new(test_app_config()),
            subscription_use_cases: self.harness.use_cases.clone(),
            credit_ledger_use_cases: self.harness.ledger.clone(),
            plan_catalog_use_cases: self.harness.catalog.clone(),
            renewal_use_cases: self.harness.renewal.clone(),
            webhook_processor: self.harness.processor.clone(),
        }
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
