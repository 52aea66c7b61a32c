use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription::{GuardedWrite, SubscriptionRepo, SubscriptionUpsert},
    domain::entities::{
        plan_tier::PlanTier, subscription::SubscriptionRecord,
        subscription_status::SubscriptionStatus,
    },
};

fn row_to_record(row: &sqlx::postgres::PgRow) -> SubscriptionRecord {
    SubscriptionRecord {
        id: row.get("id"),
        retailer_id: row.get("retailer_id"),
        external_subscription_id: row.get("external_subscription_id"),
        external_customer_id: row.get("external_customer_id"),
        status: row.get("status"),
        plan_tier: row.get("plan_tier"),
        included_sessions: row.get("included_sessions"),
        price_id: row.get("price_id"),
        period_start: row.get("period_start"),
        period_end: row.get("period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        next_plan_tier: row.get::<Option<PlanTier>, _>("next_plan_tier"),
        last_event_at: row.get("last_event_at"),
        superseded_by: row.get("superseded_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, retailer_id, external_subscription_id, external_customer_id, status, plan_tier,
    included_sessions, price_id, period_start, period_end, cancel_at_period_end,
    next_plan_tier, last_event_at, superseded_by, created_at, updated_at
"#;

/// Cancel the retailer's other ACTIVE records so the new one can take the slot guarded by
/// the partial unique index. Returns the superseded ids.
async fn supersede_active(
    tx: &mut Transaction<'_, Postgres>,
    retailer_id: Uuid,
    keep_external_id: Option<&str>,
    keep_id: Option<Uuid>,
) -> AppResult<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'canceled', updated_at = NOW()
        WHERE retailer_id = $1
          AND status = 'active'
          AND external_subscription_id IS DISTINCT FROM $2
          AND id IS DISTINCT FROM $3
        RETURNING id
        "#,
    )
    .bind(retailer_id)
    .bind(keep_external_id)
    .bind(keep_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(AppError::from)?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

/// Classify a write the guard refused by the stored record's current status. The caller
/// drops the transaction, rolling back any supersession done before the refused write.
async fn refused_write(
    tx: &mut Transaction<'_, Postgres>,
    lookup: RecordLookup<'_>,
) -> AppResult<GuardedWrite> {
    let status: Option<SubscriptionStatus> = match lookup {
        RecordLookup::External(external_id) => {
            sqlx::query_scalar("SELECT status FROM subscriptions WHERE external_subscription_id = $1")
                .bind(external_id)
                .fetch_optional(&mut **tx)
                .await
        }
        RecordLookup::Id(id) => {
            sqlx::query_scalar("SELECT status FROM subscriptions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
        }
    }
    .map_err(AppError::from)?;

    match status {
        None => Err(AppError::NotFound),
        Some(status) if status.is_terminal() => Ok(GuardedWrite::Terminal),
        Some(_) => Ok(GuardedWrite::Stale),
    }
}

enum RecordLookup<'a> {
    External(&'a str),
    Id(Uuid),
}

async fn link_superseded(
    tx: &mut Transaction<'_, Postgres>,
    superseded: &[Uuid],
    by: Uuid,
) -> AppResult<()> {
    if superseded.is_empty() {
        return Ok(());
    }
    sqlx::query("UPDATE subscriptions SET superseded_by = $1 WHERE id = ANY($2)")
        .bind(by)
        .bind(superseded)
        .execute(&mut **tx)
        .await
        .map_err(AppError::from)?;
    tracing::info!(superseded = ?superseded, by = %by, "Superseded active subscriptions");
    Ok(())
}

#[async_trait]
impl SubscriptionRepo for PostgresPersistence {
    async fn get_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE external_subscription_id = $1",
            SELECT_COLS
        ))
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_active_for_retailer(
        &self,
        retailer_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE retailer_id = $1 AND status = 'active'",
            SELECT_COLS
        ))
        .bind(retailer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_latest_for_retailer(
        &self,
        retailer_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE retailer_id = $1 ORDER BY created_at DESC LIMIT 1",
            SELECT_COLS
        ))
        .bind(retailer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn find_retailer_by_customer(&self, external_customer_id: &str) -> AppResult<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT retailer_id FROM (
                SELECT retailer_id, 0 AS priority, created_at
                FROM subscriptions WHERE external_customer_id = $1
                UNION ALL
                SELECT id, 1 AS priority, created_at
                FROM retailers WHERE gateway_customer_id = $1
            ) candidates
            ORDER BY priority, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(external_customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(id)
    }

    async fn upsert_from_gateway(&self, input: &SubscriptionUpsert) -> AppResult<GuardedWrite> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let superseded = if input.status == SubscriptionStatus::Active {
            supersede_active(
                &mut tx,
                input.retailer_id,
                Some(&input.external_subscription_id),
                None,
            )
            .await?
        } else {
            Vec::new()
        };

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscriptions
                (id, retailer_id, external_subscription_id, external_customer_id, status, plan_tier,
                 included_sessions, price_id, period_start, period_end, cancel_at_period_end,
                 next_plan_tier, last_event_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (external_subscription_id) DO UPDATE SET
                external_customer_id = COALESCE(EXCLUDED.external_customer_id, subscriptions.external_customer_id),
                status = EXCLUDED.status,
                plan_tier = EXCLUDED.plan_tier,
                included_sessions = EXCLUDED.included_sessions,
                price_id = EXCLUDED.price_id,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                next_plan_tier = EXCLUDED.next_plan_tier,
                last_event_at = GREATEST(subscriptions.last_event_at, EXCLUDED.last_event_at),
                updated_at = NOW()
            WHERE subscriptions.status NOT IN ('canceled', 'expired')
              AND (EXCLUDED.last_event_at IS NULL
                   OR subscriptions.last_event_at IS NULL
                   OR EXCLUDED.last_event_at >= subscriptions.last_event_at)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(Uuid::new_v4())
        .bind(input.retailer_id)
        .bind(&input.external_subscription_id)
        .bind(&input.external_customer_id)
        .bind(input.status)
        .bind(input.plan_tier)
        .bind(input.included_sessions)
        .bind(&input.price_id)
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.cancel_at_period_end)
        .bind(input.next_plan_tier)
        .bind(input.event_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return refused_write(
                &mut tx,
                RecordLookup::External(&input.external_subscription_id),
            )
            .await;
        };

        let record = row_to_record(&row);
        link_superseded(&mut tx, &superseded, record.id).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(GuardedWrite::Written(record))
    }

    async fn create_admin_assignment(
        &self,
        retailer_id: Uuid,
        plan_tier: PlanTier,
        included_sessions: i32,
    ) -> AppResult<SubscriptionRecord> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let superseded = supersede_active(&mut tx, retailer_id, None, None).await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscriptions (id, retailer_id, status, plan_tier, included_sessions)
            VALUES ($1, $2, 'active', $3, $4)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(Uuid::new_v4())
        .bind(retailer_id)
        .bind(plan_tier)
        .bind(included_sessions)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let record = row_to_record(&row);
        link_superseded(&mut tx, &superseded, record.id).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(record)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
        clear_pending_downgrade: bool,
        event_at: Option<DateTime<Utc>>,
    ) -> AppResult<GuardedWrite> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let superseded = if status == SubscriptionStatus::Active {
            let retailer_id: Uuid =
                sqlx::query_scalar("SELECT retailer_id FROM subscriptions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(AppError::from)?
                    .ok_or(AppError::NotFound)?;
            supersede_active(&mut tx, retailer_id, None, Some(id)).await?
        } else {
            Vec::new()
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE subscriptions SET
                status = $2,
                cancel_at_period_end = CASE WHEN $3 THEN FALSE ELSE cancel_at_period_end END,
                next_plan_tier = CASE WHEN $3 THEN NULL ELSE next_plan_tier END,
                last_event_at = GREATEST(last_event_at, $4),
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('canceled', 'expired')
              AND ($4::timestamptz IS NULL OR last_event_at IS NULL OR $4 >= last_event_at)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(status)
        .bind(clear_pending_downgrade)
        .bind(event_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return refused_write(&mut tx, RecordLookup::Id(id)).await;
        };

        let record = row_to_record(&row);
        link_superseded(&mut tx, &superseded, record.id).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(GuardedWrite::Written(record))
    }

    async fn set_pending_downgrade(
        &self,
        id: Uuid,
        cancel_at_period_end: bool,
        next_plan_tier: Option<PlanTier>,
    ) -> AppResult<SubscriptionRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE subscriptions SET
                cancel_at_period_end = $2,
                next_plan_tier = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(cancel_at_period_end)
        .bind(next_plan_tier)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?
        .ok_or(AppError::NotFound)?;
        Ok(row_to_record(&row))
    }
}
