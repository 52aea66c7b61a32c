use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::payment_gateway::{GatewaySubscription, PaymentGateway},
        use_cases::{
            credit_ledger::{CreditLedgerUseCases, CreditOutcome},
            plan_catalog::{PlanCatalog, PlanCatalogUseCases},
        },
    },
    domain::{
        entities::{
            credit::{MAX_INCLUDED_QUOTA, current_period_month},
            plan_tier::PlanTier,
            retailer::RetailerProfile,
            subscription::SubscriptionRecord,
            subscription_status::SubscriptionStatus,
        },
        reconciliation::{PlanChange, decide},
    },
};

// ============================================================================
// Repository inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub retailer_id: Uuid,
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_tier: PlanTier,
    pub included_sessions: i32,
    pub price_id: Option<String>,
    pub period_start: Option<NaiveDateTime>,
    pub period_end: Option<NaiveDateTime>,
    pub cancel_at_period_end: bool,
    pub next_plan_tier: Option<PlanTier>,
    pub event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSubscriptionEvent {
    pub subscription_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub gateway_event_id: Option<String>,
    pub metadata: serde_json::Value,
}

// ============================================================================
// Repository traits
// ============================================================================

#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn get_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>>;

    async fn get_active_for_retailer(&self, retailer_id: Uuid)
    -> AppResult<Option<SubscriptionRecord>>;

    /// Most recently created record regardless of status.
    async fn get_latest_for_retailer(&self, retailer_id: Uuid)
    -> AppResult<Option<SubscriptionRecord>>;

    async fn find_retailer_by_customer(&self, external_customer_id: &str) -> AppResult<Option<Uuid>>;

    /// Insert or update by external id. When the result is ACTIVE, any other ACTIVE record
    /// of the retailer is moved to CANCELED in the same transaction. An existing record is
    /// only updated while it is not terminal and `input.event_at` is not older than its
    /// `last_event_at`; the check and the write are one storage operation.
    async fn upsert_from_gateway(&self, input: &SubscriptionUpsert) -> AppResult<GuardedWrite>;

    /// Insert a gateway-less ACTIVE record, superseding the current ACTIVE one.
    async fn create_admin_assignment(
        &self,
        retailer_id: Uuid,
        plan_tier: PlanTier,
        included_sessions: i32,
    ) -> AppResult<SubscriptionRecord>;

    /// Move to `status` under the same guard as `upsert_from_gateway`. Moving to ACTIVE
    /// supersedes other ACTIVE records of the retailer.
    async fn update_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
        clear_pending_downgrade: bool,
        event_at: Option<DateTime<Utc>>,
    ) -> AppResult<GuardedWrite>;

    async fn set_pending_downgrade(
        &self,
        id: Uuid,
        cancel_at_period_end: bool,
        next_plan_tier: Option<PlanTier>,
    ) -> AppResult<SubscriptionRecord>;
}

#[async_trait]
pub trait RetailerRepo: Send + Sync {
    async fn get_by_id(&self, retailer_id: Uuid) -> AppResult<Option<RetailerProfile>>;

    async fn set_plan_tier(&self, retailer_id: Uuid, plan_tier: PlanTier) -> AppResult<()>;

    async fn set_active(&self, retailer_id: Uuid, is_active: bool) -> AppResult<()>;

    async fn set_gateway_customer(&self, retailer_id: Uuid, customer_id: &str) -> AppResult<()>;
}

#[async_trait]
pub trait SubscriptionEventRepo: Send + Sync {
    async fn record(&self, event: &NewSubscriptionEvent) -> AppResult<()>;
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of a storage write guarded against terminal records and out-of-order events.
#[derive(Debug, Clone)]
pub enum GuardedWrite {
    Written(SubscriptionRecord),
    /// The stored record already reflects a newer event.
    Stale,
    /// The stored record is CANCELED or EXPIRED.
    Terminal,
}

impl GuardedWrite {
    /// The written record, or the outcome to report when the guard refused the write.
    pub fn into_record(self) -> Result<SubscriptionRecord, SyncOutcome> {
        match self {
            GuardedWrite::Written(record) => Ok(record),
            GuardedWrite::Stale => Err(SyncOutcome::Stale),
            GuardedWrite::Terminal => Err(SyncOutcome::Terminal),
        }
    }
}

/// Identifies the gateway event driving a state change.
#[derive(Debug, Clone, Default)]
pub struct GatewayEventContext {
    pub event_id: Option<String>,
    pub event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Applied {
        record: SubscriptionRecord,
        change: PlanChange,
        credited: Option<i32>,
    },
    /// The record already reflects a newer event.
    Stale,
    /// The record is CANCELED or EXPIRED and is never reopened.
    Terminal,
    /// Nothing to apply, e.g. an unknown price or a status with no entitlement meaning.
    Unresolvable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanAssignment {
    pub record: SubscriptionRecord,
    pub previous_tier: PlanTier,
    pub change: PlanChange,
    pub credited: Option<i32>,
}

// ============================================================================
// Use cases
// ============================================================================

#[derive(Clone)]
pub struct SubscriptionUseCases {
    subscriptions: Arc<dyn SubscriptionRepo>,
    retailers: Arc<dyn RetailerRepo>,
    events: Arc<dyn SubscriptionEventRepo>,
    catalog: Arc<PlanCatalogUseCases>,
    ledger: Arc<CreditLedgerUseCases>,
    gateway: Arc<dyn PaymentGateway>,
}

impl SubscriptionUseCases {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepo>,
        retailers: Arc<dyn RetailerRepo>,
        events: Arc<dyn SubscriptionEventRepo>,
        catalog: Arc<PlanCatalogUseCases>,
        ledger: Arc<CreditLedgerUseCases>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            retailers,
            events,
            catalog,
            ledger,
            gateway,
        }
    }

    pub async fn get_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>> {
        self.subscriptions
            .get_by_external_id(external_subscription_id)
            .await
    }

    /// The ACTIVE record if any, otherwise the most recent one.
    pub async fn get_current(&self, retailer_id: Uuid) -> AppResult<Option<SubscriptionRecord>> {
        if let Some(active) = self.subscriptions.get_active_for_retailer(retailer_id).await? {
            return Ok(Some(active));
        }
        self.subscriptions.get_latest_for_retailer(retailer_id).await
    }

    pub async fn find_retailer_by_customer(&self, customer_id: &str) -> AppResult<Option<Uuid>> {
        self.subscriptions.find_retailer_by_customer(customer_id).await
    }

    /// Tier currently in effect for the retailer: the ACTIVE record's, else the cached one.
    pub async fn effective_tier(&self, retailer_id: Uuid) -> AppResult<PlanTier> {
        if let Some(active) = self.subscriptions.get_active_for_retailer(retailer_id).await? {
            return Ok(active.plan_tier);
        }
        Ok(self
            .retailers
            .get_by_id(retailer_id)
            .await?
            .map(|r| r.plan_tier)
            .unwrap_or_default())
    }

    async fn audit(
        &self,
        record: &SubscriptionRecord,
        event_type: &str,
        previous_status: Option<SubscriptionStatus>,
        gateway_event_id: Option<&str>,
        metadata: serde_json::Value,
    ) {
        let event = NewSubscriptionEvent {
            subscription_id: record.id,
            event_type: event_type.to_string(),
            previous_status,
            new_status: Some(record.status),
            gateway_event_id: gateway_event_id.map(str::to_string),
            metadata,
        };
        if let Err(e) = self.events.record(&event).await {
            tracing::warn!(
                subscription_id = %record.id,
                event_type,
                error = %e,
                "Failed to write subscription audit event"
            );
        }
    }

    /// Apply the ledger side of a plan change. Failures were already retried by the ledger
    /// and are accepted here as temporary inconsistency.
    async fn reconcile_credit(
        &self,
        catalog: &PlanCatalog,
        retailer_id: Uuid,
        previous_tier: PlanTier,
        new_tier: PlanTier,
        new_quota: i32,
        upgrade_ref: String,
        admin: bool,
    ) -> (PlanChange, Option<i32>) {
        let decision = decide(previous_tier, new_tier, new_quota);
        let base_included = catalog.included_quota_for(previous_tier);

        let result = match decision.top_up {
            Some(top_up) if admin => self
                .ledger
                .credit_admin_upgrade(retailer_id, base_included, top_up, &upgrade_ref)
                .await
                .map(|o| matches!(o, CreditOutcome::Applied(_)).then_some(top_up)),
            Some(top_up) => self
                .ledger
                .credit_upgrade(retailer_id, base_included, top_up, &upgrade_ref)
                .await
                .map(|o| matches!(o, CreditOutcome::Applied(_)).then_some(top_up)),
            None => self
                .ledger
                .ensure_row(retailer_id, new_quota)
                .await
                .map(|_| None),
        };

        match result {
            Ok(credited) => (decision.change, credited),
            Err(e) => {
                tracing::warn!(
                    retailer_id = %retailer_id,
                    change = decision.change.as_str(),
                    error = %e,
                    "Ledger update failed, accepting temporary inconsistency"
                );
                (decision.change, None)
            }
        }
    }

    /// Upsert the local record from the gateway's view of a subscription.
    pub async fn sync_from_gateway(
        &self,
        retailer_id: Uuid,
        subscription: &GatewaySubscription,
        ctx: &GatewayEventContext,
    ) -> AppResult<SyncOutcome> {
        let Some(status) = SubscriptionStatus::from_stripe(&subscription.status) else {
            return Ok(SyncOutcome::Unresolvable(format!(
                "status '{}' carries no entitlement",
                subscription.status
            )));
        };

        let existing = self.subscriptions.get_by_external_id(&subscription.id).await?;
        if let Some(existing) = &existing {
            if existing.status.is_terminal() {
                return Ok(SyncOutcome::Terminal);
            }
            if ctx.event_at.is_some_and(|at| existing.is_stale(at)) {
                return Ok(SyncOutcome::Stale);
            }
        } else if status.is_terminal() {
            return Ok(SyncOutcome::Unresolvable(
                "terminal status for an unknown subscription".into(),
            ));
        }

        let catalog = self.catalog.load().await;
        let resolved = match subscription.price_id().map(|p| catalog.resolve_plan(p)) {
            Some(Ok(resolved)) => resolved,
            _ => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    price_id = ?subscription.price_id(),
                    "Subscription price does not map to a plan"
                );
                return Ok(SyncOutcome::Unresolvable("unknown price".into()));
            }
        };

        let previous_tier = match &existing {
            Some(existing) if existing.status.is_active() => existing.plan_tier,
            _ => self.effective_tier(retailer_id).await?,
        };

        let next_plan_tier = if subscription.cancel_at_period_end {
            existing
                .as_ref()
                .and_then(|e| e.next_plan_tier)
                .or(Some(PlanTier::Starter))
        } else {
            None
        };

        let input = SubscriptionUpsert {
            retailer_id,
            external_subscription_id: subscription.id.clone(),
            external_customer_id: Some(subscription.customer.clone()),
            status,
            plan_tier: resolved.tier,
            included_sessions: resolved.included,
            price_id: subscription.price_id().map(str::to_string),
            period_start: subscription.period_start().map(|d| d.naive_utc()),
            period_end: subscription.period_end().map(|d| d.naive_utc()),
            cancel_at_period_end: subscription.cancel_at_period_end,
            next_plan_tier,
            event_at: ctx.event_at,
        };
        let record = match self.subscriptions.upsert_from_gateway(&input).await?.into_record() {
            Ok(record) => record,
            Err(outcome) => {
                tracing::info!(
                    subscription_id = %subscription.id,
                    outcome = ?outcome,
                    "Gateway sync refused by storage guard"
                );
                return Ok(outcome);
            }
        };

        if let Err(e) = self
            .retailers
            .set_gateway_customer(retailer_id, &subscription.customer)
            .await
        {
            tracing::warn!(retailer_id = %retailer_id, error = %e, "Failed to store gateway customer id");
        }

        let (change, credited) = match status {
            SubscriptionStatus::Active => {
                self.refresh_cached_plan(retailer_id).await?;
                let upgrade_ref = format!(
                    "{}:{}:{}",
                    subscription.id,
                    resolved.tier,
                    current_period_month()
                );
                self.reconcile_credit(
                    &catalog,
                    retailer_id,
                    previous_tier,
                    resolved.tier,
                    resolved.included,
                    upgrade_ref,
                    false,
                )
                .await
            }
            s if s.is_terminal() => {
                self.refresh_cached_plan(retailer_id).await?;
                (PlanChange::Lateral, None)
            }
            _ => (PlanChange::Lateral, None),
        };

        self.audit(
            &record,
            "gateway_sync",
            existing.as_ref().map(|e| e.status),
            ctx.event_id.as_deref(),
            serde_json::json!({
                "plan_tier": resolved.tier,
                "previous_tier": previous_tier,
                "change": change.as_str(),
                "credited": credited,
                "cancel_at_period_end": subscription.cancel_at_period_end,
            }),
        )
        .await;

        tracing::info!(
            retailer_id = %retailer_id,
            subscription_id = %subscription.id,
            status = %status,
            plan_tier = %resolved.tier,
            change = change.as_str(),
            "Subscription synced from gateway"
        );

        Ok(SyncOutcome::Applied {
            record,
            change,
            credited,
        })
    }

    /// Re-derive the cached plan from the stored ACTIVE record, STARTER when there is none.
    /// Reading after the guarded write keeps a concurrent expiry from being undone.
    async fn refresh_cached_plan(&self, retailer_id: Uuid) -> AppResult<PlanTier> {
        let tier = self
            .subscriptions
            .get_active_for_retailer(retailer_id)
            .await?
            .map(|active| active.plan_tier)
            .unwrap_or_default();
        self.retailers.set_plan_tier(retailer_id, tier).await?;
        Ok(tier)
    }

    /// Shared guard for status transitions driven by a gateway event on a known record.
    async fn transition_guard(
        &self,
        external_subscription_id: &str,
        ctx: &GatewayEventContext,
    ) -> AppResult<Result<SubscriptionRecord, SyncOutcome>> {
        let Some(record) = self
            .subscriptions
            .get_by_external_id(external_subscription_id)
            .await?
        else {
            return Ok(Err(SyncOutcome::Unresolvable(
                "no local record for subscription".into(),
            )));
        };
        if record.status.is_terminal() {
            return Ok(Err(SyncOutcome::Terminal));
        }
        if ctx.event_at.is_some_and(|at| record.is_stale(at)) {
            return Ok(Err(SyncOutcome::Stale));
        }
        Ok(Ok(record))
    }

    /// Payment failed: PAST_DUE, plan unchanged.
    pub async fn mark_past_due(
        &self,
        external_subscription_id: &str,
        ctx: &GatewayEventContext,
    ) -> AppResult<SyncOutcome> {
        let record = match self.transition_guard(external_subscription_id, ctx).await? {
            Ok(record) => record,
            Err(outcome) => return Ok(outcome),
        };

        let updated = match self
            .subscriptions
            .update_status(record.id, SubscriptionStatus::PastDue, false, ctx.event_at)
            .await?
            .into_record()
        {
            Ok(updated) => updated,
            Err(outcome) => return Ok(outcome),
        };
        self.audit(
            &updated,
            "payment_failed",
            Some(record.status),
            ctx.event_id.as_deref(),
            serde_json::json!({}),
        )
        .await;

        tracing::warn!(
            retailer_id = %record.retailer_id,
            subscription_id = external_subscription_id,
            "Subscription payment failed, marked past due"
        );

        Ok(SyncOutcome::Applied {
            record: updated,
            change: PlanChange::Lateral,
            credited: None,
        })
    }

    /// Invoice paid: a PAST_DUE record returns to ACTIVE. On a billing-cycle invoice the
    /// new period's ledger row is opened at the record's `included_sessions` snapshot, the
    /// same quota the credits read falls back to.
    pub async fn record_payment(
        &self,
        external_subscription_id: &str,
        invoice_id: &str,
        is_renewal: bool,
        ctx: &GatewayEventContext,
    ) -> AppResult<SyncOutcome> {
        let record = match self.transition_guard(external_subscription_id, ctx).await? {
            Ok(record) => record,
            Err(outcome) => return Ok(outcome),
        };

        let record = if record.status == SubscriptionStatus::PastDue {
            let updated = match self
                .subscriptions
                .update_status(record.id, SubscriptionStatus::Active, false, ctx.event_at)
                .await?
                .into_record()
            {
                Ok(updated) => updated,
                Err(outcome) => return Ok(outcome),
            };
            self.refresh_cached_plan(updated.retailer_id).await?;
            self.audit(
                &updated,
                "payment_recovered",
                Some(record.status),
                ctx.event_id.as_deref(),
                serde_json::json!({ "invoice_id": invoice_id }),
            )
            .await;
            updated
        } else {
            record
        };

        let mut credited = None;
        if is_renewal {
            let included = record.included_sessions;
            match self
                .ledger
                .open_renewal_period(record.retailer_id, included, invoice_id)
                .await
            {
                Ok(opened) if opened.created => credited = Some(included),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    retailer_id = %record.retailer_id,
                    error = %e,
                    "Failed to open renewal period, accepting temporary inconsistency"
                ),
            }
        }

        Ok(SyncOutcome::Applied {
            record,
            change: PlanChange::Lateral,
            credited,
        })
    }

    /// Subscription deleted: EXPIRED, pending downgrade cleared, cached plan back to STARTER.
    /// The current period's `included` is left as is.
    pub async fn expire(
        &self,
        external_subscription_id: &str,
        ctx: &GatewayEventContext,
    ) -> AppResult<SyncOutcome> {
        let record = match self.transition_guard(external_subscription_id, ctx).await? {
            Ok(record) => record,
            Err(outcome) => return Ok(outcome),
        };

        let updated = match self
            .subscriptions
            .update_status(record.id, SubscriptionStatus::Expired, true, ctx.event_at)
            .await?
            .into_record()
        {
            Ok(updated) => updated,
            Err(outcome) => return Ok(outcome),
        };
        self.refresh_cached_plan(record.retailer_id).await?;

        self.audit(
            &updated,
            "subscription_deleted",
            Some(record.status),
            ctx.event_id.as_deref(),
            serde_json::json!({ "plan_tier": record.plan_tier }),
        )
        .await;

        tracing::info!(
            retailer_id = %record.retailer_id,
            subscription_id = external_subscription_id,
            "Subscription expired, plan reverted"
        );

        Ok(SyncOutcome::Applied {
            record: updated,
            change: decide(record.plan_tier, PlanTier::Starter, 0).change,
            credited: None,
        })
    }

    /// Record a deferred downgrade on the ACTIVE record. Entitlements are untouched until
    /// the renewal scheduler applies it.
    pub async fn schedule_downgrade(
        &self,
        retailer_id: Uuid,
        target: PlanTier,
    ) -> AppResult<SubscriptionRecord> {
        let active = self
            .subscriptions
            .get_active_for_retailer(retailer_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let updated = self
            .subscriptions
            .set_pending_downgrade(active.id, true, Some(target))
            .await?;
        self.audit(
            &updated,
            "downgrade_scheduled",
            Some(active.status),
            None,
            serde_json::json!({ "from": active.plan_tier, "to": target }),
        )
        .await;

        tracing::info!(
            retailer_id = %retailer_id,
            from = %active.plan_tier,
            to = %target,
            "Deferred downgrade scheduled"
        );
        Ok(updated)
    }

    /// Best effort: the local record is authoritative for the deferred transition.
    async fn tell_gateway_cancel(&self, record: &SubscriptionRecord, cancel: bool) {
        let Some(external_id) = record.external_subscription_id.as_deref() else {
            return;
        };
        if let Err(e) = self.gateway.set_cancel_at_period_end(external_id, cancel).await {
            tracing::warn!(
                retailer_id = %record.retailer_id,
                subscription_id = external_id,
                cancel,
                error = %e,
                "Gateway cancel flag update failed"
            );
        }
    }

    /// Retailer self-service cancellation at the end of the current period.
    pub async fn cancel_at_period_end(&self, retailer_id: Uuid) -> AppResult<SubscriptionRecord> {
        let active = self
            .subscriptions
            .get_active_for_retailer(retailer_id)
            .await?
            .ok_or_else(|| AppError::InvalidInput("No active subscription to cancel".into()))?;
        if active.plan_tier == PlanTier::Starter {
            return Err(AppError::InvalidInput(
                "The free plan cannot be canceled".into(),
            ));
        }

        self.tell_gateway_cancel(&active, true).await;
        self.schedule_downgrade(retailer_id, PlanTier::Starter).await
    }

    /// Immediate admin assignment that bypasses the gateway.
    pub async fn set_plan(
        &self,
        retailer_id: Uuid,
        tier: PlanTier,
        included_override: Option<i32>,
    ) -> AppResult<PlanAssignment> {
        if included_override.is_some_and(|n| !(0..=MAX_INCLUDED_QUOTA).contains(&n)) {
            return Err(AppError::InvalidInput(format!(
                "includedOverride must be between 0 and {MAX_INCLUDED_QUOTA}"
            )));
        }
        self.retailers
            .get_by_id(retailer_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let previous = self.subscriptions.get_active_for_retailer(retailer_id).await?;
        let previous_tier = self.effective_tier(retailer_id).await?;
        let catalog = self.catalog.load().await;
        let quota = included_override.unwrap_or_else(|| catalog.included_quota_for(tier));

        let record = self
            .subscriptions
            .create_admin_assignment(retailer_id, tier, quota)
            .await?;
        self.retailers.set_plan_tier(retailer_id, tier).await?;

        let upgrade_ref = format!("admin:{}:{}:{}", retailer_id, tier, current_period_month());
        let (change, credited) = self
            .reconcile_credit(
                &catalog,
                retailer_id,
                previous_tier,
                tier,
                quota,
                upgrade_ref,
                true,
            )
            .await;

        self.audit(
            &record,
            "admin_set_plan",
            previous.as_ref().map(|p| p.status),
            None,
            serde_json::json!({
                "previous_tier": previous_tier,
                "plan_tier": tier,
                "included_override": included_override,
                "superseded": previous.as_ref().map(|p| p.id),
                "change": change.as_str(),
                "credited": credited,
            }),
        )
        .await;

        tracing::info!(
            retailer_id = %retailer_id,
            from = %previous_tier,
            to = %tier,
            change = change.as_str(),
            "Admin plan assignment"
        );

        Ok(PlanAssignment {
            record,
            previous_tier,
            change,
            credited,
        })
    }

    /// Admin close: deferred downgrade to STARTER, stop renewing, deactivate the account.
    pub async fn close_account(&self, retailer_id: Uuid) -> AppResult<Option<SubscriptionRecord>> {
        self.retailers
            .get_by_id(retailer_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let scheduled = match self.subscriptions.get_active_for_retailer(retailer_id).await? {
            Some(active) => {
                self.tell_gateway_cancel(&active, true).await;
                Some(self.schedule_downgrade(retailer_id, PlanTier::Starter).await?)
            }
            None => None,
        };

        self.retailers.set_active(retailer_id, false).await?;
        tracing::info!(retailer_id = %retailer_id, "Retailer account closed");
        Ok(scheduled)
    }

    /// Admin restore: drop the pending downgrade and reactivate the account.
    pub async fn restore_account(&self, retailer_id: Uuid) -> AppResult<Option<SubscriptionRecord>> {
        self.retailers
            .get_by_id(retailer_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let restored = match self.subscriptions.get_active_for_retailer(retailer_id).await? {
            Some(active) if active.cancel_at_period_end || active.next_plan_tier.is_some() => {
                self.tell_gateway_cancel(&active, false).await;
                let updated = self
                    .subscriptions
                    .set_pending_downgrade(active.id, false, None)
                    .await?;
                self.audit(
                    &updated,
                    "downgrade_cleared",
                    Some(active.status),
                    None,
                    serde_json::json!({ "was": active.next_plan_tier }),
                )
                .await;
                Some(updated)
            }
            other => other,
        };

        self.retailers.set_active(retailer_id, true).await?;
        tracing::info!(retailer_id = %retailer_id, "Retailer account restored");
        Ok(restored)
    }
}
