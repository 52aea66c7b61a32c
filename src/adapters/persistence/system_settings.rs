use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    adapters::persistence::{PostgresPersistence, parse_json_with_fallback},
    app_error::{AppError, AppResult},
    application::use_cases::plan_catalog::{PlanSettingsDocument, SystemSettingsRepo},
};

const SYSTEM_CATEGORY: &str = "SYSTEM";

#[async_trait]
impl SystemSettingsRepo for PostgresPersistence {
    async fn get_plan_settings(&self) -> AppResult<PlanSettingsDocument> {
        let settings: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT settings FROM category_settings WHERE category = $1")
                .bind(SYSTEM_CATEGORY)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::from)?;

        let Some(settings) = settings else {
            return Ok(PlanSettingsDocument::default());
        };

        let plans: HashMap<String, serde_json::Value> = parse_json_with_fallback(
            &settings["subscriptionPlans"],
            "subscriptionPlans",
            "category_settings",
            SYSTEM_CATEGORY,
        );
        Ok(PlanSettingsDocument::from_tier_map(&plans))
    }
}
