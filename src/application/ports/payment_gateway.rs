use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::app_error::AppResult;

// ============================================================================
// Gateway object shapes
//
// These mirror the JSON objects the gateway sends in webhook payloads and returns
// from its REST API, so the same types serve both paths.
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: GatewaySubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl GatewaySubscription {
    /// First price on the subscription, which identifies the plan.
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySubscriptionItems {
    #[serde(default)]
    pub data: Vec<GatewaySubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscriptionItem {
    pub price: GatewayPrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPrice {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCheckoutSession {
    pub id: String,
    pub mode: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ============================================================================
// Port
// ============================================================================

/// Outbound calls to the payment processor. Implementations bound every call with a
/// short timeout; callers treat failures as non-fatal where the flow allows it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str) -> AppResult<GatewaySubscription>;

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<GatewayCustomer>;

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> AppResult<GatewaySubscription>;
}
