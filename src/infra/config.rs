use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::plan_catalog::{BillingInterval, PriceTable},
    domain::entities::plan_tier::PlanTier,
};

pub struct AppConfig {
    /// HS256 secret shared with the managed auth backend.
    pub jwt_secret: SecretString,
    pub gateway_secret_key: SecretString,
    pub gateway_webhook_secret: SecretString,
    /// Shared secret the external renewal scheduler sends in `x-cron-secret`.
    pub cron_secret: SecretString,
    pub gateway_api_base: Url,
    pub gateway_timeout: Duration,
    pub ledger_retry_delay: Duration,
    pub cors_origin: HeaderValue,
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub prices: Arc<PriceTable>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = SecretString::new(get_env::<String>("JWT_SECRET").into());
        let gateway_secret_key = SecretString::new(get_env::<String>("STRIPE_SECRET_KEY").into());
        let gateway_webhook_secret =
            SecretString::new(get_env::<String>("STRIPE_WEBHOOK_SECRET").into());
        let cron_secret = SecretString::new(get_env::<String>("CRON_SECRET").into());

        let gateway_api_base: Url = get_env_default(
            "STRIPE_API_BASE",
            Url::parse("https://api.stripe.com/v1/")?,
        );
        let gateway_timeout_ms: u64 = get_env_default("STRIPE_TIMEOUT_MS", 5_000);
        let ledger_retry_delay_ms: u64 = get_env_default("LEDGER_RETRY_DELAY_MS", 200);

        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .map_err(|_| anyhow::anyhow!("CORS_ORIGIN must be a valid header value"))?;
        let bind_addr: SocketAddr = get_env_default("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)));
        let database_url: String = get_env("DATABASE_URL");

        let prices = price_table_from(|key| std::env::var(key).ok())
            .map_err(|e| anyhow::anyhow!("Invalid price configuration: {e}"))?;
        tracing::info!(
            plans = prices.plan_count(),
            bundles = prices.bundle_count(),
            "Loaded price table"
        );

        Ok(Self {
            jwt_secret,
            gateway_secret_key,
            gateway_webhook_secret,
            cron_secret,
            gateway_api_base,
            gateway_timeout: Duration::from_millis(gateway_timeout_ms),
            ledger_retry_delay: Duration::from_millis(ledger_retry_delay_ms),
            cors_origin,
            bind_addr,
            database_url,
            prices: Arc::new(prices),
        })
    }
}

/// Build the price table from `PRICE_<TIER>_MONTHLY`, `PRICE_<TIER>_YEARLY` and
/// `CREDIT_BUNDLE_PRICES`. Unset plan prices are skipped; anything malformed is an error.
pub fn price_table_from(lookup: impl Fn(&str) -> Option<String>) -> AppResult<PriceTable> {
    let mut plans = Vec::new();
    for tier in PlanTier::ALL {
        for interval in [BillingInterval::Monthly, BillingInterval::Yearly] {
            let key = format!(
                "PRICE_{}_{}",
                tier.as_str(),
                interval.as_str().to_uppercase()
            );
            if let Some(price_id) = lookup(&key) {
                if price_id.trim().is_empty() {
                    return Err(AppError::InvalidInput(format!("{key} is set but empty")));
                }
                plans.push((price_id, tier, interval));
            }
        }
    }

    let bundles = match lookup("CREDIT_BUNDLE_PRICES") {
        Some(raw) => PriceTable::parse_bundles(&raw)?,
        None => Vec::new(),
    };

    PriceTable::new(plans, bundles)
}
