use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::credit_ledger::{
        CreditApplication, CreditLedgerRepo, CreditOutcome, EnsuredRow, NewCreditEvent,
    },
    domain::entities::credit::{CreditBalance, CreditBucket, CreditEvent},
};

fn row_to_balance(row: &sqlx::postgres::PgRow) -> CreditBalance {
    CreditBalance {
        retailer_id: row.get("retailer_id"),
        period_month: row.get("period_month"),
        included: row.get("included"),
        purchased: row.get("purchased"),
        consumed: row.get("consumed"),
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> CreditEvent {
    CreditEvent {
        id: row.get("id"),
        retailer_id: row.get("retailer_id"),
        period_month: row.get("period_month"),
        delta: row.get("delta"),
        source: row.get("source"),
        external_ref: row.get("external_ref"),
        created_at: row.get("created_at"),
    }
}

const BALANCE_COLS: &str = "retailer_id, period_month, included, purchased, consumed";

const EVENT_COLS: &str = "id, retailer_id, period_month, delta, source, external_ref, created_at";

#[async_trait]
impl CreditLedgerRepo for PostgresPersistence {
    async fn ensure_row(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
        default_included: i32,
    ) -> AppResult<EnsuredRow> {
        let row = sqlx::query(&format!(
            "SELECT {}, created FROM ensure_credit_row($1, $2, $3)",
            BALANCE_COLS
        ))
        .bind(retailer_id)
        .bind(period_month)
        .bind(default_included)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;

        Ok(EnsuredRow {
            balance: row_to_balance(&row),
            created: row.get("created"),
        })
    }

    async fn apply_credit(&self, credit: &CreditApplication) -> AppResult<CreditOutcome> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO credit_events (id, retailer_id, period_month, delta, source, external_ref)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source, external_ref) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credit.retailer_id)
        .bind(credit.period_month)
        .bind(credit.delta)
        .bind(credit.source)
        .bind(&credit.external_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        if inserted.is_none() {
            tx.rollback().await.map_err(AppError::from)?;
            return Ok(CreditOutcome::Duplicate);
        }

        let (included_delta, purchased_delta) = match credit.source.bucket() {
            CreditBucket::Included => (credit.delta, 0),
            CreditBucket::Purchased => (0, credit.delta),
        };

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO credit_ledger (retailer_id, period_month, included, purchased, consumed)
            VALUES ($1, $2, $3 + $4, $5, 0)
            ON CONFLICT (retailer_id, period_month) DO UPDATE SET
                included = credit_ledger.included + $4,
                purchased = credit_ledger.purchased + $5,
                updated_at = NOW()
            RETURNING {}
            "#,
            BALANCE_COLS
        ))
        .bind(credit.retailer_id)
        .bind(credit.period_month)
        .bind(credit.base_included)
        .bind(included_delta)
        .bind(purchased_delta)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::from)?;

        tx.commit().await.map_err(AppError::from)?;
        Ok(CreditOutcome::Applied(row_to_balance(&row)))
    }

    async fn record_event(&self, event: &NewCreditEvent) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO credit_events (id, retailer_id, period_month, delta, source, external_ref)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source, external_ref) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.retailer_id)
        .bind(event.period_month)
        .bind(event.delta)
        .bind(event.source)
        .bind(&event.external_ref)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn read_balance(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Option<CreditBalance>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM credit_ledger WHERE retailer_id = $1 AND period_month = $2",
            BALANCE_COLS
        ))
        .bind(retailer_id)
        .bind(period_month)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_balance))
    }

    async fn list_events(
        &self,
        retailer_id: Uuid,
        period_month: NaiveDate,
    ) -> AppResult<Vec<CreditEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM credit_events WHERE retailer_id = $1 AND period_month = $2 ORDER BY created_at DESC",
            EVENT_COLS
        ))
        .bind(retailer_id)
        .bind(period_month)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }
}
