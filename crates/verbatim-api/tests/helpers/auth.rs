use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use uuid::Uuid;
use verbatim_api::auth::JwtClaims;

use super::TEST_JWT_SECRET;

/// Test user with a signed bearer token.
pub struct TestUser {
    pub user_id: Uuid,
    pub token: String,
}

impl TestUser {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

pub fn test_user() -> TestUser {
    let user_id = Uuid::new_v4();
    TestUser {
        user_id,
        token: token_for(user_id, TEST_JWT_SECRET, 3600),
    }
}

/// HS256 token for `user_id`, expiring `ttl_secs` from the real clock.
pub fn token_for(user_id: Uuid, secret: &str, ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id,
        exp: now + ttl_secs,
        iat: now,
        nbf: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign test token")
}
