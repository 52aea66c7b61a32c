use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::{credit::MAX_INCLUDED_QUOTA, plan_tier::PlanTier},
};

// ============================================================================
// Price table (typed startup configuration)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanPrice {
    pub tier: PlanTier,
    pub interval: BillingInterval,
}

/// Gateway price ids mapped to what they sell. Built once at startup and immutable after.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    plans: HashMap<String, PlanPrice>,
    bundles: HashMap<String, i32>,
}

impl PriceTable {
    pub fn new(
        plans: Vec<(String, PlanTier, BillingInterval)>,
        bundles: Vec<(String, i32)>,
    ) -> AppResult<Self> {
        let mut table = PriceTable::default();

        for (price_id, tier, interval) in plans {
            let price_id = validate_price_id(&price_id)?;
            if table.plans.contains_key(&price_id) {
                return Err(AppError::InvalidInput(format!(
                    "Duplicate plan price id: {price_id}"
                )));
            }
            table.plans.insert(price_id, PlanPrice { tier, interval });
        }

        for (price_id, amount) in bundles {
            let price_id = validate_price_id(&price_id)?;
            if amount <= 0 {
                return Err(AppError::InvalidInput(format!(
                    "Bundle {price_id} must grant a positive amount, got {amount}"
                )));
            }
            if table.plans.contains_key(&price_id) || table.bundles.contains_key(&price_id) {
                return Err(AppError::InvalidInput(format!(
                    "Duplicate bundle price id: {price_id}"
                )));
            }
            table.bundles.insert(price_id, amount);
        }

        Ok(table)
    }

    /// Parse `price_a:100,price_b:500`. Empty input yields no bundles.
    pub fn parse_bundles(raw: &str) -> AppResult<Vec<(String, i32)>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (price_id, amount) = entry.split_once(':').ok_or_else(|| {
                    AppError::InvalidInput(format!("Bundle entry '{entry}' is not price:amount"))
                })?;
                let amount: i32 = amount.trim().parse().map_err(|_| {
                    AppError::InvalidInput(format!("Bundle entry '{entry}' has a non-numeric amount"))
                })?;
                Ok((price_id.trim().to_string(), amount))
            })
            .collect()
    }

    pub fn plan_for(&self, price_id: &str) -> Option<PlanPrice> {
        self.plans.get(price_id).copied()
    }

    pub fn bundle_amount(&self, price_id: &str) -> Option<i32> {
        self.bundles.get(price_id).copied()
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }
}

fn validate_price_id(price_id: &str) -> AppResult<String> {
    let trimmed = price_id.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(AppError::InvalidInput(format!(
            "Invalid price id '{price_id}'"
        )));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Admin-editable settings document
// ============================================================================

/// Per-tier values read from the admin settings document. `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierOverrides {
    pub included: Option<i32>,
    pub price_monthly: Option<f64>,
    pub price_yearly: Option<f64>,
    /// `Some(None)` is an explicit "unlimited" (`-1` in the document).
    pub shops_limit: Option<Option<i32>>,
    pub allow_subdomains: Option<bool>,
}

impl TierOverrides {
    /// Reads each field independently; a mistyped or out-of-range field is ignored.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let int_field = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_i64)
                .and_then(|n| i32::try_from(n).ok())
        };
        let price_field = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_f64)
                .filter(|p| p.is_finite() && *p >= 0.0)
        };

        TierOverrides {
            included: int_field("included").filter(|n| (0..=MAX_INCLUDED_QUOTA).contains(n)),
            price_monthly: price_field("priceMonthly"),
            price_yearly: price_field("priceYearly"),
            shops_limit: int_field("shopsLimit").and_then(|n| match n {
                -1 => Some(None),
                n if n >= 0 => Some(Some(n)),
                _ => None,
            }),
            allow_subdomains: value
                .get("allowSubdomains")
                .and_then(serde_json::Value::as_bool),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanSettingsDocument {
    tiers: HashMap<PlanTier, TierOverrides>,
}

impl PlanSettingsDocument {
    /// Build from the `subscriptionPlans` map. Unknown tier keys are dropped.
    pub fn from_tier_map(map: &HashMap<String, serde_json::Value>) -> Self {
        let tiers = map
            .iter()
            .filter_map(|(key, value)| {
                let tier = key.parse::<PlanTier>().ok()?;
                Some((tier, TierOverrides::from_json(value)))
            })
            .collect();
        PlanSettingsDocument { tiers }
    }

    pub fn overrides(&self, tier: PlanTier) -> Option<&TierOverrides> {
        self.tiers.get(&tier)
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedPlan {
    pub tier: PlanTier,
    pub included: i32,
    pub interval: BillingInterval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSettings {
    pub tier: PlanTier,
    pub included: i32,
    pub price_monthly: Option<f64>,
    pub price_yearly: Option<f64>,
    /// `None` means unlimited.
    pub shops_limit: Option<i32>,
    pub allow_subdomains: bool,
}

fn default_price(tier: PlanTier) -> Option<f64> {
    match tier {
        PlanTier::Enterprise => None,
        _ => Some(0.0),
    }
}

/// Effective plan catalog for one request: the startup price table combined with the
/// current admin settings document.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    prices: Arc<PriceTable>,
    settings: PlanSettingsDocument,
}

impl PlanCatalog {
    pub fn new(prices: Arc<PriceTable>, settings: PlanSettingsDocument) -> Self {
        Self { prices, settings }
    }

    pub fn resolve_plan(&self, price_id: &str) -> AppResult<ResolvedPlan> {
        let plan = self.prices.plan_for(price_id).ok_or(AppError::NotFound)?;
        Ok(ResolvedPlan {
            tier: plan.tier,
            included: self.included_quota_for(plan.tier),
            interval: plan.interval,
        })
    }

    pub fn included_quota_for(&self, tier: PlanTier) -> i32 {
        self.settings
            .overrides(tier)
            .and_then(|o| o.included)
            .unwrap_or_else(|| tier.default_included())
    }

    pub fn bundle_credits_for(&self, price_id: &str) -> Option<i32> {
        self.prices.bundle_amount(price_id)
    }

    pub fn tier_settings(&self, tier: PlanTier) -> TierSettings {
        let overrides = self.settings.overrides(tier).cloned().unwrap_or_default();
        TierSettings {
            tier,
            included: overrides.included.unwrap_or_else(|| tier.default_included()),
            price_monthly: overrides.price_monthly.or_else(|| default_price(tier)),
            price_yearly: overrides.price_yearly.or_else(|| default_price(tier)),
            shops_limit: overrides
                .shops_limit
                .unwrap_or_else(|| tier.default_shops_limit()),
            allow_subdomains: overrides
                .allow_subdomains
                .unwrap_or_else(|| tier.default_allows_subdomains()),
        }
    }

    pub fn all_tiers(&self) -> Vec<TierSettings> {
        PlanTier::ALL.iter().map(|t| self.tier_settings(*t)).collect()
    }
}

// ============================================================================
// Use cases
// ============================================================================

#[async_trait]
pub trait SystemSettingsRepo: Send + Sync {
    /// Load the plan section of the system settings row. A missing row is an empty document.
    async fn get_plan_settings(&self) -> AppResult<PlanSettingsDocument>;
}

#[derive(Clone)]
pub struct PlanCatalogUseCases {
    settings_repo: Arc<dyn SystemSettingsRepo>,
    prices: Arc<PriceTable>,
}

impl PlanCatalogUseCases {
    pub fn new(settings_repo: Arc<dyn SystemSettingsRepo>, prices: Arc<PriceTable>) -> Self {
        Self {
            settings_repo,
            prices,
        }
    }

    /// Always yields a usable catalog; a settings read failure falls back to defaults.
    pub async fn load(&self) -> PlanCatalog {
        let settings = match self.settings_repo.get_plan_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load plan settings, using defaults");
                PlanSettingsDocument::default()
            }
        };
        PlanCatalog::new(self.prices.clone(), settings)
    }
}
