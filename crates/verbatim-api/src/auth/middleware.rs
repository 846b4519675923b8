use crate::auth::models::{AuthUser, JwtClaims};
use crate::error::HttpAppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use verbatim_core::AppError;

#[derive(Clone)]
pub struct AuthState {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthState {
    /// HS256 validation against the shared JWT secret.
    pub fn new(jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;
        // Tokens from the auth provider carry an audience we do not check.
        validation.validate_aud = false;

        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AppError> {
        let token_data =
            decode::<JwtClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                tracing::debug!("JWT validation failed: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        AppError::Unauthorized("Token has expired".to_string())
                    }
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                        AppError::Unauthorized("Token is not yet valid (nbf)".to_string())
                    }
                    _ => AppError::Unauthorized("Invalid or expired token".to_string()),
                }
            })?;

        Ok(token_data.claims)
    }
}

pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = match request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
    {
        Some(h) => h,
        None => {
            return HttpAppError(AppError::Unauthorized(
                "Missing authorization header".to_string(),
            ))
            .into_response();
        }
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return HttpAppError(AppError::Unauthorized(
            "Invalid authorization header format".to_string(),
        ))
        .into_response();
    };

    let claims = match auth_state.validate_token(token) {
        Ok(claims) => claims,
        Err(e) => return HttpAppError(e).into_response(),
    };

    let user = AuthUser {
        user_id: claims.sub,
        access_token: token.to_string(),
    };
    request.extensions_mut().insert(user);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    const SECRET: &str = "test-jwt-secret-at-least-32-characters";

    fn token(secret: &str, exp_offset: i64) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: user_id,
            exp: now + exp_offset,
            iat: now,
            nbf: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (user_id, token)
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let (user_id, token) = token(SECRET, 3600);
        let claims = AuthState::new(SECRET).validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
    }

    #[test]
    fn test_expired_token_rejected() {
        let (_, token) = token(SECRET, -3600);
        let err = AuthState::new(SECRET).validate_token(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref msg) if msg.contains("expired")));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (_, token) = token("another-secret-that-is-long-enough!!", 3600);
        assert!(AuthState::new(SECRET).validate_token(&token).is_err());
    }
}
