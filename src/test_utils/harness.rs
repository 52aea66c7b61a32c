//! Real use cases wired to in-memory mocks.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use uuid::Uuid;

use crate::{
    application::{
        ports::payment_gateway::{GatewaySubscriptionItems, PaymentGateway},
        use_cases::{
            credit_ledger::CreditLedgerUseCases,
            plan_catalog::PlanCatalogUseCases,
            renewal::RenewalUseCases,
            subscription::{NewSubscriptionEvent, SubscriptionUseCases},
            webhook_processor::WebhookProcessor,
        },
    },
    domain::entities::{
        credit::{CreditBalance, CreditEvent, current_period_month},
        plan_tier::PlanTier,
        retailer::RetailerProfile,
    },
    test_utils::{
        InMemoryCreditLedgerRepo, InMemoryProcessedEventRepo, InMemoryRenewalRepo,
        InMemoryRetailerRepo, InMemorySubscriptionEventRepo, InMemorySubscriptionRepo,
        InMemorySystemSettingsRepo, StubPaymentGateway, TEST_WEBHOOK_SECRET,
        create_test_retailer, price_items, test_price_table,
    },
};

pub struct SubscriptionHarness {
    pub use_cases: Arc<SubscriptionUseCases>,
    pub processor: Arc<WebhookProcessor>,
    pub ledger: Arc<CreditLedgerUseCases>,
    pub catalog: Arc<PlanCatalogUseCases>,
    pub renewal: Arc<RenewalUseCases>,
    pub gateway: Arc<StubPaymentGateway>,
    pub subscriptions: Arc<InMemorySubscriptionRepo>,
    pub retailers: Arc<InMemoryRetailerRepo>,
    pub subscription_events: Arc<InMemorySubscriptionEventRepo>,
    pub ledger_repo: Arc<InMemoryCreditLedgerRepo>,
    pub processed: Arc<InMemoryProcessedEventRepo>,
    pub settings: Arc<InMemorySystemSettingsRepo>,
    pub renewal_repo: Arc<InMemoryRenewalRepo>,
}

impl SubscriptionHarness {
    pub fn new() -> Self {
        let gateway = Arc::new(StubPaymentGateway::new());
        let subscriptions = Arc::new(InMemorySubscriptionRepo::new());
        let retailers = Arc::new(InMemoryRetailerRepo::new());
        let subscription_events = Arc::new(InMemorySubscriptionEventRepo::new());
        let ledger_repo = Arc::new(InMemoryCreditLedgerRepo::new());
        let processed = Arc::new(InMemoryProcessedEventRepo::new());
        let settings = Arc::new(InMemorySystemSettingsRepo::new());
        let renewal_repo = Arc::new(InMemoryRenewalRepo::new());

        let catalog = Arc::new(PlanCatalogUseCases::new(
            settings.clone(),
            Arc::new(test_price_table()),
        ));
        let ledger = Arc::new(CreditLedgerUseCases::new(
            ledger_repo.clone(),
            Duration::from_millis(1),
        ));
        let use_cases = Arc::new(SubscriptionUseCases::new(
            subscriptions.clone(),
            retailers.clone(),
            subscription_events.clone(),
            catalog.clone(),
            ledger.clone(),
            gateway.clone() as Arc<dyn PaymentGateway>,
        ));
        let processor = Arc::new(WebhookProcessor::new(
            use_cases.clone(),
            ledger.clone(),
            catalog.clone(),
            gateway.clone() as Arc<dyn PaymentGateway>,
            processed.clone(),
            SecretString::new(TEST_WEBHOOK_SECRET.into()),
        ));
        let renewal = Arc::new(RenewalUseCases::new(renewal_repo.clone()));

        Self {
            use_cases,
            processor,
            ledger,
            catalog,
            renewal,
            gateway,
            subscriptions,
            retailers,
            subscription_events,
            ledger_repo,
            processed,
            settings,
            renewal_repo,
        }
    }

    pub fn add_retailer(&self, plan_tier: PlanTier) -> Uuid {
        let retailer = create_test_retailer(|r| r.plan_tier = plan_tier);
        let id = retailer.id;
        self.retailers.insert(retailer);
        id
    }

    pub fn retailer(&self, retailer_id: Uuid) -> RetailerProfile {
        self.retailers
            .get(retailer_id)
            .expect("retailer should exist")
    }

    /// Current period ledger row.
    pub fn balance(&self, retailer_id: Uuid) -> CreditBalance {
        self.ledger_repo
            .balance(retailer_id, current_period_month())
            .expect("ledger row should exist")
    }

    /// Current period credit events in insertion order.
    pub fn credit_events(&self, retailer_id: Uuid) -> Vec<CreditEvent> {
        let period_month = current_period_month();
        self.ledger_repo
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.retailer_id == retailer_id && e.period_month == period_month)
            .cloned()
            .collect()
    }

    pub fn clear_ledger(&self) {
        self.ledger_repo.clear();
    }

    pub fn fail_ledger_writes(&self, n: usize) {
        self.ledger_repo.fail_next_writes(n);
    }

    pub fn subscription_count(&self, retailer_id: Uuid) -> usize {
        self.subscriptions.count_for_retailer(retailer_id)
    }

    pub fn active_count(&self, retailer_id: Uuid) -> usize {
        self.subscriptions.active_count_for_retailer(retailer_id)
    }

    pub fn audit_events(&self) -> Vec<NewSubscriptionEvent> {
        self.subscription_events.all()
    }

    pub fn processed_ids(&self) -> Vec<String> {
        self.processed.ids()
    }

    pub fn price_items(&self, price_id: &str) -> GatewaySubscriptionItems {
        price_items(price_id)
    }
}

impl Default for SubscriptionHarness {
    fn default() -> Self {
        Self::new()
    }
}
