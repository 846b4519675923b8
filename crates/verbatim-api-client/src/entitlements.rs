//! Remote implementations of the entitlement collaborators

use async_trait::async_trait;
use verbatim_core::models::{
    EntitlementSnapshot, SessionContext, VerificationRequest, VerificationResult,
};
use verbatim_core::{AppError, AuthoritativeSource, SubscriptionVerifier};

use crate::{ApiClient, CAN_USER_RECORD_PATH, VERIFY_SUBSCRIPTION_PATH};

/// `POST /verify-subscription`
#[derive(Clone, Debug)]
pub struct HttpVerifier {
    client: ApiClient,
}

impl HttpVerifier {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubscriptionVerifier for HttpVerifier {
    #[tracing::instrument(skip(self, session), fields(user_id = %session.user_id))]
    async fn verify(
        &self,
        session: &SessionContext,
        force_refresh: bool,
    ) -> Result<VerificationResult, AppError> {
        self.client
            .post_json(
                VERIFY_SUBSCRIPTION_PATH,
                &session.access_token,
                &VerificationRequest { force_refresh },
            )
            .await
    }
}

/// `GET /rpc/can_user_record`
#[derive(Clone, Debug)]
pub struct HttpAuthoritativeSource {
    client: ApiClient,
}

impl HttpAuthoritativeSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuthoritativeSource for HttpAuthoritativeSource {
    #[tracing::instrument(skip(self, session), fields(user_id = %session.user_id))]
    async fn fetch(&self, session: &SessionContext) -> Result<EntitlementSnapshot, AppError> {
        self.client
            .get(CAN_USER_RECORD_PATH, &session.access_token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;
    use uuid::Uuid;
    use verbatim_core::models::AccessReason;

    fn session() -> SessionContext {
        SessionContext::new(Uuid::new_v4(), "jwt-token")
    }

    #[tokio::test]
    async fn test_verify_posts_force_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/verify-subscription")
            .match_header("authorization", "Bearer jwt-token")
            .match_body(Matcher::Json(serde_json::json!({ "forceRefresh": true })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"verified":true,"status":"active","statusChanged":false,"canRecord":true,
                    "canAccessFeatures":true,"currentPeriodEnd":null,"message":"Subscription verified"}"#,
            )
            .create_async()
            .await;

        let verifier = HttpVerifier::new(ApiClient::new(server.url(), Duration::from_secs(5)).unwrap());
        let result = verifier.verify(&session(), true).await.unwrap();

        mock.assert_async().await;
        assert!(result.verified);
        assert!(result.can_record);
        assert_eq!(result.status, "active");
    }

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rpc/can_user_record")
            .match_header("authorization", "Bearer jwt-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"decision":{"canRecord":true,"canAccessFeatures":true,"reason":"active_trial",
                    "accessEndsAt":"2026-06-20T10:00:00Z","daysUntilAccessEnds":5,"trialDaysRemaining":5},
                    "subscription":null}"#,
            )
            .create_async()
            .await;

        let source =
            HttpAuthoritativeSource::new(ApiClient::new(server.url(), Duration::from_secs(5)).unwrap());
        let snapshot = source.fetch(&session()).await.unwrap();
        assert_eq!(snapshot.decision.reason, AccessReason::ActiveTrial);
        assert_eq!(snapshot.decision.trial_days_remaining, 5);
        assert!(snapshot.subscription.is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_is_not_authenticated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rpc/can_user_record")
            .with_status(401)
            .with_body(r#"{"error":"Not authenticated"}"#)
            .create_async()
            .await;

        let source =
            HttpAuthoritativeSource::new(ApiClient::new(server.url(), Duration::from_secs(5)).unwrap());
        assert!(matches!(
            source.fetch(&session()).await,
            Err(AppError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_server_outage_is_verification_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/verify-subscription")
            .with_status(503)
            .with_body(r#"{"error":"Verification unavailable"}"#)
            .create_async()
            .await;

        let verifier = HttpVerifier::new(ApiClient::new(server.url(), Duration::from_secs(5)).unwrap());
        assert!(matches!(
            verifier.verify(&session(), false).await,
            Err(AppError::VerificationUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_verification_unavailable() {
        // Nothing listens on the discard port.
        let verifier =
            HttpVerifier::new(ApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap());
        assert!(matches!(
            verifier.verify(&session(), true).await,
            Err(AppError::VerificationUnavailable(_))
        ));
    }
}
