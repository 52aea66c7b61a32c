use std::sync::Arc;

use crate::{
    infra::config::AppConfig,
    use_cases::{
        credit_ledger::CreditLedgerUseCases, plan_catalog::PlanCatalogUseCases,
        renewal::RenewalUseCases, subscription::SubscriptionUseCases,
        webhook_processor::WebhookProcessor,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub subscription_use_cases: Arc<SubscriptionUseCases>,
    pub credit_ledger_use_cases: Arc<CreditLedgerUseCases>,
    pub plan_catalog_use_cases: Arc<PlanCatalogUseCases>,
    pub renewal_use_cases: Arc<RenewalUseCases>,
    pub webhook_processor: Arc<WebhookProcessor>,
}
