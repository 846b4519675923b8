use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use verbatim_core::AppError;

use super::{PaymentProvider, ProviderSubscription};

/// Stripe-compatible subscription API client
#[derive(Clone)]
pub struct StripeProvider {
    http_client: Client,
    base_url: String,
    secret_key: String,
}

impl std::fmt::Debug for StripeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl StripeProvider {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    #[tracing::instrument(skip(self))]
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, AppError> {
        let url = format!("{}/v1/subscriptions/{}", self.base_url, subscription_id);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(status = %status, "Payment provider returned an error");
            return Err(AppError::PaymentProvider(format!(
                "Subscription lookup failed: {} - {}",
                status, error_text
            )));
        }

        response
            .json::<ProviderSubscription>()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Invalid subscription body: {}", e)))
    }
}
