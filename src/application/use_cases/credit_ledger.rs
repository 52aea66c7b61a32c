use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_retry::{RetryIf, strategy::FixedInterval};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::credit::{CreditBalance, CreditEvent, CreditSource, current_period_month},
};

/// A credit to apply: one event row plus the matching counter increment.
#[derive(Debug, Clone)]
pub struct CreditApplication {
    pub retailer_id: Uuid,
    pub period_month: NaiveDate,
    /// `included` used if the period row has to be created by this application.
    pub base_included: i32,
    pub delta: i32,
    pub source: CreditSource,
    pub external_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied(CreditBalance),
    /// An event with the same `(source, external_ref)` already exists; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredRow {
    pub balance: CreditBalance,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct NewCreditEvent {
    pub retailer_id: Uuid,
    pub period_month: NaiveDate,
    pub delta: i32,
    pub source: CreditSource,
    pub external_ref: String,
}

#[async_trait]
pub trait CreditLedgerRepo: Send + Sync {
    /// Create the period row at `default_included` or raise an existing row's `included`
    /// to at least that value. Never lowers it.
    async fn ensure_row(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
        default_included: i32,
    ) -> AppResult<EnsuredRow>;

    /// Insert the event and increment the counter in one transaction, deduplicated by
    /// `(source, external_ref)`.
    async fn apply_credit(&self, credit: &CreditApplication) -> AppResult<CreditOutcome>;

    /// Append an event without touching counters. Returns `false` on a duplicate ref.
    async fn record_event(&self, event: &NewCreditEvent) -> AppResult<bool>;

    async fn read_balance(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Option<CreditBalance>>;

    /// Newest first.
    async fn list_events(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Vec<CreditEvent>>;
}

#[derive(Clone)]
pub struct CreditLedgerUseCases {
    repo: Arc<dyn CreditLedgerRepo>,
    retry_delay: Duration,
}

impl CreditLedgerUseCases {
    pub fn new(repo: Arc<dyn CreditLedgerRepo>, retry_delay: Duration) -> Self {
        Self { repo, retry_delay }
    }

    /// Run a ledger mutation, re-issuing it once on a retryable failure. Every mutation
    /// passed here is idempotent, so the retry cannot double-apply.
    async fn with_fallback<T, F, Fut>(&self, operation: &'static str, action: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let strategy = FixedInterval::new(self.retry_delay).take(1);
        RetryIf::start(strategy, action, |e: &AppError| {
            let retryable = e.is_retryable();
            if retryable {
                tracing::warn!(operation, error = %e, "Ledger write failed, retrying once");
            }
            retryable
        })
        .await
        .inspect_err(|e| {
            tracing::error!(
                operation,
                error = %e,
                "Ledger write failed after fallback, ledger may be temporarily inconsistent"
            );
        })
    }

    pub async fn ensure_row(&self, retailer_id: Uuid, default_included: i32) -> AppResult<EnsuredRow> {
        let period_month = current_period_month();
        self.with_fallback("ensure_row", || {
            self.repo
                .ensure_row(retailer_id, period_month, default_included)
        })
        .await
    }

    pub async fn credit_bundle(
        &self,
        retailer_id: Uuid,
        base_included: i32,
        delta: i32,
        payment_ref: &str,
    ) -> AppResult<CreditOutcome> {
        self.apply(retailer_id, base_included, delta, CreditSource::Bundle, payment_ref)
            .await
    }

    pub async fn credit_upgrade(
        &self,
        retailer_id: Uuid,
        base_included: i32,
        delta: i32,
        subscription_ref: &str,
    ) -> AppResult<CreditOutcome> {
        self.apply(retailer_id, base_included, delta, CreditSource::Upgrade, subscription_ref)
            .await
    }

    pub async fn credit_admin_upgrade(
        &self,
        retailer_id: Uuid,
        base_included: i32,
        delta: i32,
        reference: &str,
    ) -> AppResult<CreditOutcome> {
        self.apply(
            retailer_id,
            base_included,
            delta,
            CreditSource::AdminPlanUpgrade,
            reference,
        )
        .await
    }

    async fn apply(
        &self,
        retailer_id: Uuid,
        base_included: i32,
        delta: i32,
        source: CreditSource,
        external_ref: &str,
    ) -> AppResult<CreditOutcome> {
        if delta <= 0 {
            return Err(AppError::InvalidInput(format!(
                "Credit delta must be positive, got {delta}"
            )));
        }
        if external_ref.trim().is_empty() {
            return Err(AppError::InvalidInput("Credit reference is required".into()));
        }

        let credit = CreditApplication {
            retailer_id,
            period_month: current_period_month(),
            base_included,
            delta,
            source,
            external_ref: external_ref.to_string(),
        };

        let outcome = self
            .with_fallback(source.as_str(), || self.repo.apply_credit(&credit))
            .await?;

        match &outcome {
            CreditOutcome::Applied(balance) => tracing::info!(
                retailer_id = %retailer_id,
                source = %source,
                delta,
                external_ref,
                available = balance.available(),
                "Credit applied"
            ),
            CreditOutcome::Duplicate => tracing::info!(
                retailer_id = %retailer_id,
                source = %source,
                external_ref,
                "Credit already applied, skipping"
            ),
        }

        Ok(outcome)
    }

    /// Ensure the current period row exists for a renewed subscription. The renewal event
    /// is written only when this call created the row.
    pub async fn open_renewal_period(
        &self,
        retailer_id: Uuid,
        included: i32,
        invoice_ref: &str,
    ) -> AppResult<EnsuredRow> {
        let period_month = current_period_month();
        let ensured = self
            .with_fallback("open_renewal_period", || {
                self.repo.ensure_row(retailer_id, period_month, included)
            })
            .await?;

        if ensured.created && included > 0 {
            let event = NewCreditEvent {
                retailer_id,
                period_month,
                delta: included,
                source: CreditSource::Renewal,
                external_ref: invoice_ref.to_string(),
            };
            let recorded = self
                .with_fallback("record_renewal_event", || self.repo.record_event(&event))
                .await?;
            tracing::info!(
                retailer_id = %retailer_id,
                %period_month,
                included,
                recorded,
                "Opened renewal period"
            );
        }

        Ok(ensured)
    }

    pub async fn read_balance(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<CreditBalance> {
        self.repo
            .read_balance(retailer_id, period_month)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn list_events(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Vec<CreditEvent>> {
        self.repo.list_events(retailer_id, period_month).await
    }
}
