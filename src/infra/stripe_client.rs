use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_gateway::{GatewayCustomer, GatewaySubscription, PaymentGateway},
};

/// Stripe REST client behind the `PaymentGateway` port.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    api_base: Url,
    secret_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: String,
}

impl StripeClient {
    pub fn new(secret_key: SecretString, api_base: Url, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base,
            secret_key,
        })
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.api_base
            .join(path)
            .map_err(|e| AppError::Internal(format!("Invalid Stripe URL {path}: {e}")))
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Stripe API error");
            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .map(|e| e.error.message.unwrap_or(e.error.error_type))
                .unwrap_or(body);
            return Err(error_for_status(status, message));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(body = %body, error = %e, "Failed to parse Stripe response");
            AppError::Gateway(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

/// Rate limits and server errors are transient; other client errors are not.
fn error_for_status(status: StatusCode, message: String) -> AppError {
    if status == StatusCode::NOT_FOUND {
        AppError::NotFound
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AppError::Gateway(format!("Stripe {status}: {message}"))
    } else {
        AppError::InvalidInput(format!("Stripe error: {message}"))
    }
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Gateway("Stripe request timed out".into())
    } else {
        AppError::Gateway(format!("Stripe request failed: {}", e))
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn retrieve_subscription(&self, subscription_id: &str) -> AppResult<GatewaySubscription> {
        let response = self
            .client
            .get(self.endpoint(&format!("subscriptions/{subscription_id}"))?)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(transport_error)?;

        self.handle_response(response).await
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<GatewayCustomer> {
        let response = self
            .client
            .get(self.endpoint(&format!("customers/{customer_id}"))?)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(transport_error)?;

        self.handle_response(response).await
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> AppResult<GatewaySubscription> {
        let params = [("cancel_at_period_end", cancel.to_string())];
        let response = self
            .client
            .post(self.endpoint(&format!("subscriptions/{subscription_id}"))?)
            .header("Authorization", self.auth_header())
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        self.handle_response(response).await
    }
}
