//! In-memory mocks for the credit ledger, plan settings and renewal ports.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::{
        credit_ledger::{
            CreditApplication, CreditLedgerRepo, CreditOutcome, EnsuredRow, NewCreditEvent,
        },
        plan_catalog::{PlanSettingsDocument, SystemSettingsRepo},
        renewal::RenewalRepo,
    },
    domain::entities::credit::{CreditBalance, CreditBucket, CreditEvent},
};

// ============================================================================
// InMemoryCreditLedgerRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryCreditLedgerRepo {
    pub rows: Mutex<HashMap<(Uuid, NaiveDate), CreditBalance>>,
    pub events: Mutex<Vec<CreditEvent>>,
    failures_left: AtomicUsize,
    write_attempts: AtomicUsize,
}

impl InMemoryCreditLedgerRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with a retryable database error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of `apply_credit` calls, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn set_consumed(&self, retailer_id: Uuid, period_month: NaiveDate, consumed: i32) {
        if let Some(row) = self
            .rows
            .lock()
            .unwrap()
            .get_mut(&(retailer_id, period_month))
        {
            row.consumed = consumed;
        }
    }

    pub fn balance(&self, retailer_id: Uuid, period_month: NaiveDate) -> Option<CreditBalance> {
        self.rows
            .lock()
            .unwrap()
            .get(&(retailer_id, period_month))
            .cloned()
    }

    pub fn clear(&self) {
        self.rows.lock().unwrap().clear();
        self.events.lock().unwrap().clear();
    }

    fn injected_failure(&self) -> AppResult<()> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::Database("injected ledger failure".into()));
        }
        Ok(())
    }

    fn has_event(events: &[CreditEvent], event: &NewCreditEvent) -> bool {
        events
            .iter()
            .any(|e| e.source == event.source && e.external_ref == event.external_ref)
    }

    fn push_event(events: &mut Vec<CreditEvent>, event: &NewCreditEvent) {
        events.push(CreditEvent {
            id: Uuid::new_v4(),
            retailer_id: event.retailer_id,
            period_month: event.period_month,
            delta: event.delta,
            source: event.source,
            external_ref: event.external_ref.clone(),
            created_at: Some(chrono::Utc::now().naive_utc()),
        });
    }
}

#[async_trait]
impl CreditLedgerRepo for InMemoryCreditLedgerRepo {
    async fn ensure_row(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
        default_included: i32,
    ) -> AppResult<EnsuredRow> {
        self.injected_failure()?;
        let mut rows = self.rows.lock().unwrap();
        let created = !rows.contains_key(&(retailer_id, period_month));
        let row = rows
            .entry((retailer_id, period_month))
            .or_insert_with(|| CreditBalance {
                retailer_id,
                period_month,
                included: default_included,
                purchased: 0,
                consumed: 0,
            });
        row.included = row.included.max(default_included);
        Ok(EnsuredRow {
            balance: row.clone(),
            created,
        })
    }

    async fn apply_credit(&self, credit: &CreditApplication) -> AppResult<CreditOutcome> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;

        let event = NewCreditEvent {
            retailer_id: credit.retailer_id,
            period_month: credit.period_month,
            delta: credit.delta,
            source: credit.source,
            external_ref: credit.external_ref.clone(),
        };

        // Both locks held for the whole application, like the storage transaction.
        let mut events = self.events.lock().unwrap();
        if Self::has_event(&events, &event) {
            return Ok(CreditOutcome::Duplicate);
        }
        let mut rows = self.rows.lock().unwrap();

        let row = rows
            .entry((credit.retailer_id, credit.period_month))
            .or_insert_with(|| CreditBalance {
                retailer_id: credit.retailer_id,
                period_month: credit.period_month,
                included: credit.base_included,
                purchased: 0,
                consumed: 0,
            });
        match credit.source.bucket() {
            CreditBucket::Included => row.included += credit.delta,
            CreditBucket::Purchased => row.purchased += credit.delta,
        }
        Self::push_event(&mut events, &event);
        Ok(CreditOutcome::Applied(row.clone()))
    }

    async fn record_event(&self, event: &NewCreditEvent) -> AppResult<bool> {
        self.injected_failure()?;
        let mut events = self.events.lock().unwrap();
        if Self::has_event(&events, event) {
            return Ok(false);
        }
        Self::push_event(&mut events, event);
        Ok(true)
    }

    async fn read_balance(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Option<CreditBalance>> {
        Ok(self.balance(retailer_id, period_month))
    }

    async fn list_events(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Vec<CreditEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.retailer_id == retailer_id && e.period_month == period_month)
            .cloned()
            .collect())
    }
}

// ============================================================================
// InMemorySystemSettingsRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySystemSettingsRepo {
    pub document: Mutex<Option<serde_json::Value>>,
    failing: bool,
}

impl InMemorySystemSettingsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// `plans` is the `subscriptionPlans` map of the settings row.
    pub fn with_document(plans: serde_json::Value) -> Self {
        Self {
            document: Mutex::new(Some(plans)),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            document: Mutex::new(None),
            failing: true,
        }
    }
}

#[async_trait]
impl SystemSettingsRepo for InMemorySystemSettingsRepo {
    async fn get_plan_settings(&self) -> AppResult<PlanSettingsDocument> {
        if self.failing {
            return Err(AppError::Database("settings unavailable".into()));
        }
        let document = self.document.lock().unwrap().clone();
        let map: HashMap<String, serde_json::Value> = document
            .and_then(|d| serde_json::from_value(d).ok())
            .unwrap_or_default();
        Ok(PlanSettingsDocument::from_tier_map(&map))
    }
}

// ============================================================================
// InMemoryRenewalRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryRenewalRepo {
    due: AtomicI64,
    runs: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryRenewalRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// `due` deferred downgrades are pending; the first run applies all of them.
    pub fn with_due(due: i64) -> Self {
        let repo = Self::default();
        repo.due.store(due, Ordering::SeqCst);
        repo
    }

    pub fn failing() -> Self {
        let repo = Self::default();
        repo.failing.store(true, Ordering::SeqCst);
        repo
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenewalRepo for InMemoryRenewalRepo {
    async fn apply_deferred_downgrades(&self) -> AppResult<i64> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Database("procedure failed".into()));
        }
        Ok(self.due.swap(0, Ordering::SeqCst))
    }
}
