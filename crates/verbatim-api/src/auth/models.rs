use crate::error::ErrorResponse;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verbatim_core::models::SessionContext;

/// JWT claims issued by the auth provider
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: Uuid, // user_id
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

/// Authenticated caller, stored in request extensions by the auth middleware
#[derive(Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub access_token: String,
}

impl AuthUser {
    pub fn session(&self) -> SessionContext {
        SessionContext::new(self.user_id, self.access_token.clone())
    }
}

impl std::fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthUser")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Authentication required".to_string(),
                    details: None,
                    error_type: None,
                    code: "NOT_AUTHENTICATED".to_string(),
                    recoverable: false,
                    suggested_action: Some("Sign in and try again".to_string()),
                }),
            )
        })
    }
}
