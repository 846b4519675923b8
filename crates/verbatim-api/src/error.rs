//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Any `AppError`
//! converts with `?`, so status, body and log level come from
//! [`ErrorMetadata`] and stay consistent across endpoints.

use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;
use verbatim_core::{AppError, ErrorMetadata, LogLevel};

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorResponse {
    fn from_app_error(err: &AppError, with_details: bool) -> Self {
        Self {
            error: err.client_message(),
            details: with_details.then(|| err.detailed_message()),
            error_type: with_details.then(|| err.error_type().to_string()),
            code: err.error_code().to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action().map(String::from),
        }
    }
}

/// Wrapper so `AppError` (defined in verbatim-core) can implement `IntoResponse`
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        })
    }
}

impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        let body_text = rejection.body_text();
        let message = if body_text.contains("invalid type") {
            "Invalid request body: forceRefresh must be a boolean".to_string()
        } else {
            format!("Invalid request body: {}", body_text)
        };
        HttpAppError(AppError::InvalidInput(message))
    }
}

/// JSON body extractor that answers malformed bodies with our `ErrorResponse` shape.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .or_else(|_| std::env::var("APP_ENV"))
        .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
        .unwrap_or(false)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;
        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        // Details never leave the process in production or for sensitive errors.
        let with_details = !is_production_env() && !app_error.is_sensitive();
        let body = Json(ErrorResponse::from_app_error(app_error, with_details));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_error_hides_details() {
        let err = AppError::Internal("pool exhausted at 10.0.0.4".to_string());
        let body = ErrorResponse::from_app_error(&err, !err.is_sensitive());
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(body.details.is_none());
        assert_eq!(body.error, "Internal server error");
    }

    #[test]
    fn test_verification_unavailable_is_recoverable_503() {
        let response =
            HttpAppError(AppError::VerificationUnavailable("timeout".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = ErrorResponse::from_app_error(
            &AppError::VerificationUnavailable("timeout".to_string()),
            true,
        );
        assert!(body.recoverable);
        assert_eq!(body.code, "VERIFICATION_UNAVAILABLE");
        assert_eq!(body.error_type.as_deref(), Some("VerificationUnavailable"));
    }
}
