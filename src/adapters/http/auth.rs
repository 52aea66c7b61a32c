//! Request authentication for retailer, admin and scheduler callers.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::cookie::CookieJar;
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::{
        jwt::{self, Claims},
        webhook_signature::constant_time_compare,
    },
};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Cookie first, then `Authorization: Bearer`.
fn access_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_owned());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn access_claims(jar: &CookieJar, headers: &HeaderMap, app_state: &AppState) -> AppResult<Claims> {
    let token = access_token(jar, headers).ok_or(AppError::InvalidCredentials)?;
    jwt::verify(&token, &app_state.config.jwt_secret)
}

pub fn current_retailer(
    jar: &CookieJar,
    headers: &HeaderMap,
    app_state: &AppState,
) -> AppResult<Uuid> {
    access_claims(jar, headers, app_state)?.retailer_id()
}

/// Returns the admin's own id.
pub fn current_admin(jar: &CookieJar, headers: &HeaderMap, app_state: &AppState) -> AppResult<Uuid> {
    let claims = access_claims(jar, headers, app_state)?;
    if !claims.is_admin() {
        tracing::warn!(sub = %claims.sub, "Non-admin token used on admin route");
        return Err(AppError::Forbidden);
    }
    claims.retailer_id()
}

pub fn require_cron_secret(headers: &HeaderMap, app_state: &AppState) -> AppResult<()> {
    let provided = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let expected = app_state.config.cron_secret.expose_secret();
    if provided.is_empty() || !constant_time_compare(provided, expected) {
        tracing::warn!("Cron trigger rejected: bad or missing secret");
        return Err(AppError::InvalidCredentials);
    }
    Ok(())
}
