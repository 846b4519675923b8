//! HTTP client for the Verbatim entitlement API.
//!
//! Every request carries the session's bearer token. Transport failures and
//! server-side outages map to `AppError::VerificationUnavailable` so callers
//! keep their previous decision; a rejected token maps to `NotAuthenticated`.
//! The CLI uses this client directly.

pub mod changes;
pub mod entitlements;

pub use changes::HttpChangeChannel;
pub use entitlements::{HttpAuthoritativeSource, HttpVerifier};

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use verbatim_core::constants::VERIFIER_TIMEOUT_SECS;
use verbatim_core::AppError;

pub const VERIFY_SUBSCRIPTION_PATH: &str = "/verify-subscription";
pub const CAN_USER_RECORD_PATH: &str = "/rpc/can_user_record";
pub const CAN_ACCESS_FEATURES_PATH: &str = "/rpc/can_access_features";
pub const SUBSCRIPTION_CHANGES_PATH: &str = "/subscription-changes";

const DEFAULT_API_URL: &str = "http://localhost:4000";

/// HTTP client for the entitlement API
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    // Long-lived event streams: bounded connect, unbounded body.
    stream_client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to create HTTP stream client")?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create client from environment: VERBATIM_API_URL (or API_URL), VERIFIER_TIMEOUT_SECS.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VERBATIM_API_URL")
            .or_else(|_| std::env::var("API_URL"))
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let timeout = std::env::var("VERIFIER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(VERIFIER_TIMEOUT_SECS);

        Self::new(base_url, Duration::from_secs(timeout))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request.header("Authorization", format!("Bearer {}", token))
    }

    /// GET with bearer auth. Deserializes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, AppError> {
        let request = self.apply_auth(self.client.get(self.build_url(path)), token);
        let response = request.send().await.map_err(transport_error)?;
        Self::parse(response).await
    }

    /// POST a JSON body with bearer auth. Deserializes the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let request = self.apply_auth(self.client.post(self.build_url(path)).json(body), token);
        let response = request.send().await.map_err(transport_error)?;
        Self::parse(response).await
    }

    /// Open a `text/event-stream` GET with bearer auth. The response body is
    /// left unread for the caller to consume.
    pub async fn open_stream(&self, path: &str, token: &str) -> Result<Response, AppError> {
        let request = self
            .apply_auth(self.stream_client.get(self.build_url(path)), token)
            .header("Accept", "text/event-stream");
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, error_text));
        }
        Ok(response)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, error_text));
        }

        response.json::<T>().await.map_err(|e| {
            AppError::VerificationUnavailable(format!("Failed to parse response as JSON: {}", e))
        })
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    tracing::warn!(error = %err, timeout = err.is_timeout(), "Entitlement API unreachable");
    AppError::VerificationUnavailable(err.to_string())
}

fn status_error(status: StatusCode, body: String) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::NotAuthenticated,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::InvalidInput(body),
        _ => AppError::VerificationUnavailable(format!(
            "API request failed with status {}: {}",
            status, body
        )),
    }
}
