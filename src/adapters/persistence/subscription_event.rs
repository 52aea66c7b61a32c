use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription::{NewSubscriptionEvent, SubscriptionEventRepo},
};

#[async_trait]
impl SubscriptionEventRepo for PostgresPersistence {
    async fn record(&self, event: &NewSubscriptionEvent) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_events
                (id, subscription_id, event_type, previous_status, new_status, gateway_event_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.subscription_id)
        .bind(&event.event_type)
        .bind(event.previous_status)
        .bind(event.new_status)
        .bind(&event.gateway_event_id)
        .bind(&event.metadata)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }
}
