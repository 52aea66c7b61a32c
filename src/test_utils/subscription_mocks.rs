//! In-memory mocks for subscription, retailer and webhook bookkeeping ports, plus a stub
//! payment gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::payment_gateway::{GatewayCustomer, GatewaySubscription, PaymentGateway},
        use_cases::{
            subscription::{
                GuardedWrite, NewSubscriptionEvent, RetailerRepo, SubscriptionEventRepo,
                SubscriptionRepo, SubscriptionUpsert,
            },
            webhook_processor::ProcessedEventRepo,
        },
    },
    domain::entities::{
        plan_tier::PlanTier, retailer::RetailerProfile, subscription::SubscriptionRecord,
        subscription_status::SubscriptionStatus,
    },
};

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    pub records: Mutex<Vec<SubscriptionRecord>>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_for_retailer(&self, retailer_id: Uuid) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.retailer_id == retailer_id)
            .count()
    }

    pub fn active_count_for_retailer(&self, retailer_id: Uuid) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.retailer_id == retailer_id && r.status == SubscriptionStatus::Active)
            .count()
    }

    /// Cancel the retailer's ACTIVE records that `keep` rejects, mirroring the storage
    /// supersession. Returns their ids.
    fn supersede(
        records: &mut [SubscriptionRecord],
        retailer_id: Uuid,
        keep: impl Fn(&SubscriptionRecord) -> bool,
    ) -> Vec<Uuid> {
        records
            .iter_mut()
            .filter(|r| {
                r.retailer_id == retailer_id && r.status == SubscriptionStatus::Active && !keep(r)
            })
            .map(|r| {
                r.status = SubscriptionStatus::Canceled;
                r.updated_at = Some(Utc::now().naive_utc());
                r.id
            })
            .collect()
    }

    fn link(records: &mut [SubscriptionRecord], superseded: &[Uuid], by: Uuid) {
        for record in records.iter_mut().filter(|r| superseded.contains(&r.id)) {
            record.superseded_by = Some(by);
        }
    }

    /// Same predicate as the storage `WHERE` clause on guarded writes.
    fn refusal(record: &SubscriptionRecord, event_at: Option<DateTime<Utc>>) -> Option<GuardedWrite> {
        if record.status.is_terminal() {
            Some(GuardedWrite::Terminal)
        } else if event_at.is_some_and(|at| record.is_stale(at)) {
            Some(GuardedWrite::Stale)
        } else {
            None
        }
    }

    fn newest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn get_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.external_subscription_id.as_deref() == Some(external_subscription_id))
            .cloned())
    }

    async fn get_active_for_retailer(
        &self,
        retailer_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.retailer_id == retailer_id && r.status == SubscriptionStatus::Active)
            .cloned())
    }

    async fn get_latest_for_retailer(
        &self,
        retailer_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.retailer_id == retailer_id)
            .cloned())
    }

    async fn find_retailer_by_customer(&self, external_customer_id: &str) -> AppResult<Option<Uuid>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.external_customer_id.as_deref() == Some(external_customer_id))
            .map(|r| r.retailer_id))
    }

    async fn upsert_from_gateway(&self, input: &SubscriptionUpsert) -> AppResult<GuardedWrite> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now().naive_utc();

        let position = records.iter().position(|r| {
            r.external_subscription_id.as_deref() == Some(input.external_subscription_id.as_str())
        });
        if let Some(refused) = position.and_then(|i| Self::refusal(&records[i], input.event_at)) {
            return Ok(refused);
        }

        let superseded = if input.status == SubscriptionStatus::Active {
            Self::supersede(&mut records, input.retailer_id, |r| {
                r.external_subscription_id.as_deref() == Some(input.external_subscription_id.as_str())
            })
        } else {
            Vec::new()
        };

        let record = match position {
            Some(index) => {
                let record = &mut records[index];
                if input.external_customer_id.is_some() {
                    record.external_customer_id = input.external_customer_id.clone();
                }
                record.status = input.status;
                record.plan_tier = input.plan_tier;
                record.included_sessions = input.included_sessions;
                record.price_id = input.price_id.clone();
                record.period_start = input.period_start;
                record.period_end = input.period_end;
                record.cancel_at_period_end = input.cancel_at_period_end;
                record.next_plan_tier = input.next_plan_tier;
                record.last_event_at = Self::newest(record.last_event_at, input.event_at);
                record.updated_at = Some(now);
                record.clone()
            }
            None => {
                let record = SubscriptionRecord {
                    id: Uuid::new_v4(),
                    retailer_id: input.retailer_id,
                    external_subscription_id: Some(input.external_subscription_id.clone()),
                    external_customer_id: input.external_customer_id.clone(),
                    status: input.status,
                    plan_tier: input.plan_tier,
                    included_sessions: input.included_sessions,
                    price_id: input.price_id.clone(),
                    period_start: input.period_start,
                    period_end: input.period_end,
                    cancel_at_period_end: input.cancel_at_period_end,
                    next_plan_tier: input.next_plan_tier,
                    last_event_at: input.event_at,
                    superseded_by: None,
                    created_at: Some(now),
                    updated_at: Some(now),
                };
                records.push(record.clone());
                record
            }
        };

        Self::link(&mut records, &superseded, record.id);
        Ok(GuardedWrite::Written(record))
    }

    async fn create_admin_assignment(
        &self,
        retailer_id: Uuid,
        plan_tier: PlanTier,
        included_sessions: i32,
    ) -> AppResult<SubscriptionRecord> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now().naive_utc();
        let superseded = Self::supersede(&mut records, retailer_id, |_| false);

        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            retailer_id,
            external_subscription_id: None,
            external_customer_id: None,
            status: SubscriptionStatus::Active,
            plan_tier,
            included_sessions,
            price_id: None,
            period_start: None,
            period_end: None,
            cancel_at_period_end: false,
            next_plan_tier: None,
            last_event_at: None,
            superseded_by: None,
            created_at: Some(now),
            updated_at: Some(now),
        };
        records.push(record.clone());
        Self::link(&mut records, &superseded, record.id);
        Ok(record)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
        clear_pending_downgrade: bool,
        event_at: Option<DateTime<Utc>>,
    ) -> AppResult<GuardedWrite> {
        let mut records = self.records.lock().unwrap();
        let current = records
            .iter()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound)?;
        if let Some(refused) = Self::refusal(current, event_at) {
            return Ok(refused);
        }
        let retailer_id = current.retailer_id;

        let superseded = if status == SubscriptionStatus::Active {
            Self::supersede(&mut records, retailer_id, |r| r.id == id)
        } else {
            Vec::new()
        };

        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound)?;
        record.status = status;
        if clear_pending_downgrade {
            record.cancel_at_period_end = false;
            record.next_plan_tier = None;
        }
        record.last_event_at = Self::newest(record.last_event_at, event_at);
        record.updated_at = Some(Utc::now().naive_utc());
        let record = record.clone();

        Self::link(&mut records, &superseded, record.id);
        Ok(GuardedWrite::Written(record))
    }

    async fn set_pending_downgrade(
        &self,
        id: Uuid,
        cancel_at_period_end: bool,
        next_plan_tier: Option<PlanTier>,
    ) -> AppResult<SubscriptionRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound)?;
        record.cancel_at_period_end = cancel_at_period_end;
        record.next_plan_tier = next_plan_tier;
        record.updated_at = Some(Utc::now().naive_utc());
        Ok(record.clone())
    }
}

// ============================================================================
// LaggingReadSubscriptionRepo
// ============================================================================

/// Answers reads by external id from a record captured earlier and sends everything else
/// to the live repo. A request built on it behaves like one that read before a concurrent
/// request wrote.
pub struct LaggingReadSubscriptionRepo {
    inner: Arc<InMemorySubscriptionRepo>,
    snapshot: SubscriptionRecord,
}

impl LaggingReadSubscriptionRepo {
    pub fn new(inner: Arc<InMemorySubscriptionRepo>, snapshot: SubscriptionRecord) -> Self {
        Self { inner, snapshot }
    }
}

#[async_trait]
impl SubscriptionRepo for LaggingReadSubscriptionRepo {
    async fn get_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>> {
        if self.snapshot.external_subscription_id.as_deref() == Some(external_subscription_id) {
            return Ok(Some(self.snapshot.clone()));
        }
        self.inner.get_by_external_id(external_subscription_id).await
    }

    async fn get_active_for_retailer(
        &self,
        retailer_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        self.inner.get_active_for_retailer(retailer_id).await
    }

    async fn get_latest_for_retailer(
        &self,
        retailer_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        self.inner.get_latest_for_retailer(retailer_id).await
    }

    async fn find_retailer_by_customer(&self, external_customer_id: &str) -> AppResult<Option<Uuid>> {
        self.inner.find_retailer_by_customer(external_customer_id).await
    }

    async fn upsert_from_gateway(&self, input: &SubscriptionUpsert) -> AppResult<GuardedWrite> {
        self.inner.upsert_from_gateway(input).await
    }

    async fn create_admin_assignment(
        &self,
        retailer_id: Uuid,
        plan_tier: PlanTier,
        included_sessions: i32,
    ) -> AppResult<SubscriptionRecord> {
        self.inner
            .create_admin_assignment(retailer_id, plan_tier, included_sessions)
            .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
        clear_pending_downgrade: bool,
        event_at: Option<DateTime<Utc>>,
    ) -> AppResult<GuardedWrite> {
        self.inner
            .update_status(id, status, clear_pending_downgrade, event_at)
            .await
    }

    async fn set_pending_downgrade(
        &self,
        id: Uuid,
        cancel_at_period_end: bool,
        next_plan_tier: Option<PlanTier>,
    ) -> AppResult<SubscriptionRecord> {
        self.inner
            .set_pending_downgrade(id, cancel_at_period_end, next_plan_tier)
            .await
    }
}

// ============================================================================
// InMemoryRetailerRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryRetailerRepo {
    pub retailers: Mutex<HashMap<Uuid, RetailerProfile>>,
}

impl InMemoryRetailerRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, retailer: RetailerProfile) {
        self.retailers.lock().unwrap().insert(retailer.id, retailer);
    }

    pub fn get(&self, retailer_id: Uuid) -> Option<RetailerProfile> {
        self.retailers.lock().unwrap().get(&retailer_id).cloned()
    }

    fn update(&self, retailer_id: Uuid, apply: impl FnOnce(&mut RetailerProfile)) -> AppResult<()> {
        let mut retailers = self.retailers.lock().unwrap();
        let retailer = retailers.get_mut(&retailer_id).ok_or(AppError::NotFound)?;
        apply(retailer);
        retailer.updated_at = Some(Utc::now().naive_utc());
        Ok(())
    }
}

#[async_trait]
impl RetailerRepo for InMemoryRetailerRepo {
    async fn get_by_id(&self, retailer_id: Uuid) -> AppResult<Option<RetailerProfile>> {
        Ok(self.get(retailer_id))
    }

    async fn set_plan_tier(&self, retailer_id: Uuid, plan_tier: PlanTier) -> AppResult<()> {
        self.update(retailer_id, |r| r.plan_tier = plan_tier)
    }

    async fn set_active(&self, retailer_id: Uuid, is_active: bool) -> AppResult<()> {
        self.update(retailer_id, |r| r.is_active = is_active)
    }

    async fn set_gateway_customer(&self, retailer_id: Uuid, customer_id: &str) -> AppResult<()> {
        self.update(retailer_id, |r| {
            r.gateway_customer_id = Some(customer_id.to_string())
        })
    }
}

// ============================================================================
// InMemorySubscriptionEventRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionEventRepo {
    pub events: Mutex<Vec<NewSubscriptionEvent>>,
}

impl InMemorySubscriptionEventRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<NewSubscriptionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionEventRepo for InMemorySubscriptionEventRepo {
    async fn record(&self, event: &NewSubscriptionEvent) -> AppResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ============================================================================
// InMemoryProcessedEventRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryProcessedEventRepo {
    pub processed: Mutex<Vec<(String, String)>>,
}

impl InMemoryProcessedEventRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<String> {
        self.processed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl ProcessedEventRepo for InMemoryProcessedEventRepo {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool> {
        Ok(self
            .processed
            .lock()
            .unwrap()
            .iter()
            .any(|(id, _)| id == event_id))
    }

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> AppResult<()> {
        let mut processed = self.processed.lock().unwrap();
        if !processed.iter().any(|(id, _)| id == event_id) {
            processed.push((event_id.to_string(), event_type.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// StubPaymentGateway
// ============================================================================

/// Serves subscriptions and customers registered by the test. Unknown ids are `NotFound`;
/// after `fail_calls` every call fails with a retryable gateway error.
#[derive(Default)]
pub struct StubPaymentGateway {
    subscriptions: Mutex<HashMap<String, GatewaySubscription>>,
    customers: Mutex<HashMap<String, GatewayCustomer>>,
    cancel_calls: Mutex<Vec<(String, bool)>>,
    failing: AtomicBool,
}

impl StubPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_subscription(&self, subscription: GatewaySubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    /// Register a customer whose metadata points at `retailer_id`.
    pub fn put_customer(&self, customer_id: &str, retailer_id: Uuid) {
        let customer = GatewayCustomer {
            id: customer_id.to_string(),
            metadata: HashMap::from([("retailer_id".to_string(), retailer_id.to_string())]),
        };
        self.customers
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), customer);
    }

    pub fn fail_calls(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn cancel_calls(&self) -> Vec<(String, bool)> {
        self.cancel_calls.lock().unwrap().clone()
    }

    fn check_available(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Gateway("stub gateway unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn retrieve_subscription(&self, subscription_id: &str) -> AppResult<GatewaySubscription> {
        self.check_available()?;
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<GatewayCustomer> {
        self.check_available()?;
        self.customers
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> AppResult<GatewaySubscription> {
        self.check_available()?;
        self.cancel_calls
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), cancel));
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or(AppError::NotFound)?;
        subscription.cancel_at_period_end = cancel;
        Ok(subscription.clone())
    }
}
