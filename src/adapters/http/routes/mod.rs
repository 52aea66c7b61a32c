pub mod admin;
pub mod billing;
pub mod billing_webhook;
pub mod cron;

use axum::Router;

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest(
            "/billing",
            billing::router().merge(billing_webhook::router()),
        )
        .nest("/admin/retailers", admin::router())
        .nest("/cron", cron::router())
}
