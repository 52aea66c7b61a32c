use crate::{
    adapters::http::app_state::AppState,
    application::{
        ports::payment_gateway::PaymentGateway,
        use_cases::{
            credit_ledger::{CreditLedgerRepo, CreditLedgerUseCases},
            plan_catalog::{PlanCatalogUseCases, SystemSettingsRepo},
            renewal::{RenewalRepo, RenewalUseCases},
            subscription::{
                RetailerRepo, SubscriptionEventRepo, SubscriptionRepo, SubscriptionUseCases,
            },
            webhook_processor::{ProcessedEventRepo, WebhookProcessor},
        },
    },
    infra::{config::AppConfig, postgres_persistence, stripe_client::StripeClient},
};
use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;

    let postgres_arc = Arc::new(postgres_persistence(&config.database_url).await?);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeClient::new(
        config.gateway_secret_key.clone(),
        config.gateway_api_base.clone(),
        config.gateway_timeout,
    )?);

    let plan_catalog_use_cases = Arc::new(PlanCatalogUseCases::new(
        postgres_arc.clone() as Arc<dyn SystemSettingsRepo>,
        config.prices.clone(),
    ));

    let credit_ledger_use_cases = Arc::new(CreditLedgerUseCases::new(
        postgres_arc.clone() as Arc<dyn CreditLedgerRepo>,
        config.ledger_retry_delay,
    ));

    let subscription_use_cases = Arc::new(SubscriptionUseCases::new(
        postgres_arc.clone() as Arc<dyn SubscriptionRepo>,
        postgres_arc.clone() as Arc<dyn RetailerRepo>,
        postgres_arc.clone() as Arc<dyn SubscriptionEventRepo>,
        plan_catalog_use_cases.clone(),
        credit_ledger_use_cases.clone(),
        gateway.clone(),
    ));

    let webhook_processor = Arc::new(WebhookProcessor::new(
        subscription_use_cases.clone(),
        credit_ledger_use_cases.clone(),
        plan_catalog_use_cases.clone(),
        gateway,
        postgres_arc.clone() as Arc<dyn ProcessedEventRepo>,
        config.gateway_webhook_secret.clone(),
    ));

    let renewal_use_cases = Arc::new(RenewalUseCases::new(
        postgres_arc.clone() as Arc<dyn RenewalRepo>,
    ));

    Ok(AppState {
        config: Arc::new(config),
        subscription_use_cases,
        credit_ledger_use_cases,
        plan_catalog_use_cases,
        renewal_use_cases,
        webhook_processor,
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "retail_entitlements=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer);

    // File (structured JSON logs)
    match File::create("app.log") {
        Ok(file) => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(file)
                .with_current_span(true)
                .with_span_list(true);
            registry.with(json_layer).try_init().ok();
        }
        Err(e) => {
            registry.try_init().ok();
            tracing::warn!(error = %e, "Cannot create app.log, JSON file logging disabled");
        }
    }
}
