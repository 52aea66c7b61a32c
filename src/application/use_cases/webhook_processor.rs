//! Gateway webhook processing.
//!
//! Events arrive at least once and in any order. Every path below is idempotent: event ids
//! are recorded after processing, subscription upserts key on the external id, and credits
//! are deduplicated by `(source, external_ref)` in the ledger.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::payment_gateway::{
            GatewayCheckoutSession, GatewayInvoice, GatewaySubscription, PaymentGateway,
        },
        use_cases::{
            credit_ledger::{CreditLedgerUseCases, CreditOutcome},
            plan_catalog::PlanCatalogUseCases,
            subscription::{GatewayEventContext, SubscriptionUseCases, SyncOutcome},
        },
        webhook_signature,
    },
};

const RETAILER_ID_KEY: &str = "retailer_id";
const BUNDLE_PRICE_KEY: &str = "price_id";

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEventData {
    pub object: serde_json::Value,
}

impl GatewayEvent {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created, 0)
    }

    fn object<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            AppError::InvalidInput(format!(
                "Malformed {} object in event {}: {}",
                self.event_type, self.id, e
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentFailed,
    InvoicePaid,
    Unknown,
}

impl EventKind {
    pub fn classify(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => EventKind::CheckoutCompleted,
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_failed" => EventKind::InvoicePaymentFailed,
            "invoice.paid" | "invoice.payment_succeeded" => EventKind::InvoicePaid,
            _ => EventKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// The event id was already processed.
    Duplicate,
    /// Event kind or shape we do not act on.
    Ignored,
    /// Permanently skipped, e.g. no retailer correlation or a stale event.
    Skipped(String),
    /// Acknowledged, but a ledger write failed after its fallback retry. Not recorded as
    /// processed so a manual redelivery can repair it.
    Degraded(String),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Skipped(_) => "skipped",
            WebhookOutcome::Degraded(_) => "degraded",
        }
    }

    fn should_record(&self) -> bool {
        matches!(self, WebhookOutcome::Processed | WebhookOutcome::Skipped(_))
    }
}

impl From<SyncOutcome> for WebhookOutcome {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Applied { .. } => WebhookOutcome::Processed,
            SyncOutcome::Stale => WebhookOutcome::Skipped("stale event".into()),
            SyncOutcome::Terminal => WebhookOutcome::Skipped("terminal subscription".into()),
            SyncOutcome::Unresolvable(reason) => WebhookOutcome::Skipped(reason),
        }
    }
}

#[async_trait]
pub trait ProcessedEventRepo: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool>;

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct WebhookProcessor {
    subscriptions: Arc<SubscriptionUseCases>,
    ledger: Arc<CreditLedgerUseCases>,
    catalog: Arc<PlanCatalogUseCases>,
    gateway: Arc<dyn PaymentGateway>,
    processed: Arc<dyn ProcessedEventRepo>,
    webhook_secret: SecretString,
}

impl WebhookProcessor {
    pub fn new(
        subscriptions: Arc<SubscriptionUseCases>,
        ledger: Arc<CreditLedgerUseCases>,
        catalog: Arc<PlanCatalogUseCases>,
        gateway: Arc<dyn PaymentGateway>,
        processed: Arc<dyn ProcessedEventRepo>,
        webhook_secret: SecretString,
    ) -> Self {
        Self {
            subscriptions,
            ledger,
            catalog,
            gateway,
            processed,
            webhook_secret,
        }
    }

    /// Verify and process a raw delivery. Signature failures mutate nothing.
    pub async fn handle(
        &self,
        raw_body: &str,
        signature_header: Option<&str>,
    ) -> AppResult<WebhookOutcome> {
        let signature_header = signature_header.ok_or(AppError::InvalidSignature)?;
        webhook_signature::verify(
            raw_body,
            signature_header,
            self.webhook_secret.expose_secret(),
            Utc::now().timestamp(),
        )?;

        let event: GatewayEvent = serde_json::from_str(raw_body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {e}")))?;

        self.process(event).await
    }

    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process(&self, event: GatewayEvent) -> AppResult<WebhookOutcome> {
        if self.processed.is_processed(&event.id).await? {
            tracing::info!("Event already processed");
            return Ok(WebhookOutcome::Duplicate);
        }

        let ctx = GatewayEventContext {
            event_id: Some(event.id.clone()),
            event_at: event.created_at(),
        };

        let outcome = match EventKind::classify(&event.event_type) {
            EventKind::CheckoutCompleted => self.on_checkout_completed(&event, &ctx).await?,
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                self.on_subscription_changed(&event, &ctx).await?
            }
            EventKind::SubscriptionDeleted => {
                let subscription: GatewaySubscription = event.object()?;
                self.subscriptions.expire(&subscription.id, &ctx).await?.into()
            }
            EventKind::InvoicePaymentFailed => {
                let invoice: GatewayInvoice = event.object()?;
                match invoice.subscription.as_deref() {
                    Some(sub_id) => self.subscriptions.mark_past_due(sub_id, &ctx).await?.into(),
                    None => WebhookOutcome::Ignored,
                }
            }
            EventKind::InvoicePaid => {
                let invoice: GatewayInvoice = event.object()?;
                let is_renewal = invoice.billing_reason.as_deref() == Some("subscription_cycle");
                match invoice.subscription.as_deref() {
                    Some(sub_id) => self
                        .subscriptions
                        .record_payment(sub_id, &invoice.id, is_renewal, &ctx)
                        .await?
                        .into(),
                    None => WebhookOutcome::Ignored,
                }
            }
            EventKind::Unknown => {
                tracing::info!("Ignoring unhandled event type");
                WebhookOutcome::Ignored
            }
        };

        match &outcome {
            WebhookOutcome::Skipped(reason) => {
                tracing::warn!(reason = %reason, retryable = false, "Webhook event skipped")
            }
            WebhookOutcome::Degraded(reason) => {
                tracing::error!(reason = %reason, retryable = false, "Webhook event degraded")
            }
            _ => tracing::info!(outcome = outcome.as_str(), "Webhook event handled"),
        }

        if outcome.should_record() {
            if let Err(e) = self
                .processed
                .mark_processed(&event.id, &event.event_type)
                .await
            {
                tracing::warn!(error = %e, "Failed to record processed event");
            }
        }

        Ok(outcome)
    }

    /// Find the retailer an object belongs to: explicit metadata first, then the checkout
    /// reference, then local records by customer, then the gateway customer's metadata.
    async fn resolve_retailer(
        &self,
        metadata: &HashMap<String, String>,
        client_reference_id: Option<&str>,
        customer_id: Option<&str>,
    ) -> AppResult<Option<Uuid>> {
        if let Some(id) = metadata
            .get(RETAILER_ID_KEY)
            .and_then(|v| Uuid::parse_str(v).ok())
        {
            return Ok(Some(id));
        }
        if let Some(id) = client_reference_id.and_then(|v| Uuid::parse_str(v).ok()) {
            return Ok(Some(id));
        }

        let Some(customer_id) = customer_id else {
            return Ok(None);
        };
        if let Some(id) = self.subscriptions.find_retailer_by_customer(customer_id).await? {
            return Ok(Some(id));
        }

        match self.gateway.retrieve_customer(customer_id).await {
            Ok(customer) => Ok(customer
                .metadata
                .get(RETAILER_ID_KEY)
                .and_then(|v| Uuid::parse_str(v).ok())),
            Err(e) => {
                tracing::warn!(customer_id, error = %e, "Gateway customer lookup failed");
                Ok(None)
            }
        }
    }

    async fn on_checkout_completed(
        &self,
        event: &GatewayEvent,
        ctx: &GatewayEventContext,
    ) -> AppResult<WebhookOutcome> {
        let session: GatewayCheckoutSession = event.object()?;
        let Some(retailer_id) = self
            .resolve_retailer(
                &session.metadata,
                session.client_reference_id.as_deref(),
                session.customer.as_deref(),
            )
            .await?
        else {
            return Ok(WebhookOutcome::Skipped("missing retailer correlation".into()));
        };

        match session.mode.as_deref() {
            Some("subscription") => {
                let Some(subscription_id) = session.subscription.as_deref() else {
                    return Ok(WebhookOutcome::Skipped(
                        "subscription checkout without subscription id".into(),
                    ));
                };
                let subscription = self.gateway.retrieve_subscription(subscription_id).await?;
                Ok(self
                    .subscriptions
                    .sync_from_gateway(retailer_id, &subscription, ctx)
                    .await?
                    .into())
            }
            Some("payment") => self.on_bundle_purchase(retailer_id, &session).await,
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn on_bundle_purchase(
        &self,
        retailer_id: Uuid,
        session: &GatewayCheckoutSession,
    ) -> AppResult<WebhookOutcome> {
        if session.payment_status.as_deref().is_some_and(|s| s != "paid") {
            return Ok(WebhookOutcome::Skipped("bundle checkout not paid".into()));
        }

        let catalog = self.catalog.load().await;
        let price_id = session.metadata.get(BUNDLE_PRICE_KEY).map(String::as_str);
        let Some(amount) = price_id.and_then(|p| catalog.bundle_credits_for(p)) else {
            tracing::warn!(
                retailer_id = %retailer_id,
                price_id = ?price_id,
                "Bundle purchase with unknown price, no credit applied"
            );
            return Ok(WebhookOutcome::Skipped("unknown bundle price".into()));
        };

        let payment_ref = session.payment_intent.as_deref().unwrap_or(&session.id);
        let tier = self.subscriptions.effective_tier(retailer_id).await?;
        let base_included = catalog.included_quota_for(tier);

        match self
            .ledger
            .credit_bundle(retailer_id, base_included, amount, payment_ref)
            .await
        {
            Ok(CreditOutcome::Applied(_)) | Ok(CreditOutcome::Duplicate) => {
                Ok(WebhookOutcome::Processed)
            }
            Err(e) => Ok(WebhookOutcome::Degraded(format!("bundle credit failed: {e}"))),
        }
    }

    async fn on_subscription_changed(
        &self,
        event: &GatewayEvent,
        ctx: &GatewayEventContext,
    ) -> AppResult<WebhookOutcome> {
        let subscription: GatewaySubscription = event.object()?;

        let known_retailer = self
            .subscriptions
            .get_by_external_id(&subscription.id)
            .await?
            .map(|record| record.retailer_id);
        let retailer_id = match known_retailer {
            Some(id) => Some(id),
            None => {
                self.resolve_retailer(&subscription.metadata, None, Some(&subscription.customer))
                    .await?
            }
        };
        let Some(retailer_id) = retailer_id else {
            return Ok(WebhookOutcome::Skipped("missing retailer correlation".into()));
        };

        Ok(self
            .subscriptions
            .sync_from_gateway(retailer_id, &subscription, ctx)
            .await?
            .into())
    }
}
