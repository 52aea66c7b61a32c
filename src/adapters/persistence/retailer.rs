use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription::RetailerRepo,
    domain::entities::{plan_tier::PlanTier, retailer::RetailerProfile},
};

fn row_to_profile(row: sqlx::postgres::PgRow) -> RetailerProfile {
    RetailerProfile {
        id: row.get("id"),
        plan_tier: row.get("plan_tier"),
        is_active: row.get("is_active"),
        gateway_customer_id: row.get("gateway_customer_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = "id, plan_tier, is_active, gateway_customer_id, created_at, updated_at";

fn expect_one(result: sqlx::postgres::PgQueryResult) -> AppResult<()> {
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl RetailerRepo for PostgresPersistence {
    async fn get_by_id(&self, retailer_id: Uuid) -> AppResult<Option<RetailerProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM retailers WHERE id = $1",
            SELECT_COLS
        ))
        .bind(retailer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.map(row_to_profile))
    }

    async fn set_plan_tier(&self, retailer_id: Uuid, plan_tier: PlanTier) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE retailers SET plan_tier = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(retailer_id)
        .bind(plan_tier)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        expect_one(result)
    }

    async fn set_active(&self, retailer_id: Uuid, is_active: bool) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE retailers SET is_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(retailer_id)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        expect_one(result)
    }

    async fn set_gateway_customer(&self, retailer_id: Uuid, customer_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE retailers SET gateway_customer_id = $2, updated_at = NOW()
            WHERE id = $1 AND gateway_customer_id IS DISTINCT FROM $2
            "#,
        )
        .bind(retailer_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        if result.rows_affected() > 0 {
            tracing::debug!(retailer_id = %retailer_id, customer_id, "Stored gateway customer id");
        }
        Ok(())
    }
}
