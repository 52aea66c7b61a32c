use async_trait::async_trait;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::renewal::RenewalRepo,
};

#[async_trait]
impl RenewalRepo for PostgresPersistence {
    async fn apply_deferred_downgrades(&self) -> AppResult<i64> {
        let applied: i64 = sqlx::query_scalar("SELECT apply_deferred_downgrades()::BIGINT")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(applied)
    }
}
