//! Configuration module
//!
//! Environment-driven configuration for the entitlement server and clients:
//! database, HTTP server, authentication, payment provider, and the
//! freshness / trial / timeout knobs of the entitlement core.

use std::env;

use chrono::Duration;

use crate::constants::{
    CHANGE_CHANNEL_NAME, FREE_TRIAL_DAYS, FRESHNESS_THRESHOLD_SECS, VERIFIER_TIMEOUT_SECS,
    WEBHOOK_TOLERANCE_SECS,
};
use crate::freshness::FreshnessPolicy;
use crate::resolver::AccessResolver;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROVIDER_API_URL: &str = "https://api.stripe.com";

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub jwt_secret: String,
    // Entitlement core
    pub freshness_threshold_secs: i64,
    pub free_trial_days: i64,
    pub verifier_timeout_secs: u64,
    pub change_channel_name: String,
    // Payment provider
    pub provider_api_url: String,
    pub provider_secret_key: Option<String>,
    pub provider_webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let config = Config {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            cors_origins,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set for authentication"))?,
            freshness_threshold_secs: env::var("FRESHNESS_THRESHOLD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(FRESHNESS_THRESHOLD_SECS),
            free_trial_days: env::var("FREE_TRIAL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(FREE_TRIAL_DAYS),
            verifier_timeout_secs: env::var("VERIFIER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(VERIFIER_TIMEOUT_SECS),
            change_channel_name: env::var("CHANGE_CHANNEL_NAME")
                .unwrap_or_else(|_| CHANGE_CHANNEL_NAME.to_string()),
            provider_api_url: env::var("PAYMENT_PROVIDER_API_URL")
                .unwrap_or_else(|_| DEFAULT_PROVIDER_API_URL.to_string()),
            provider_secret_key: env::var("PAYMENT_PROVIDER_SECRET_KEY").ok(),
            provider_webhook_secret: env::var("PAYMENT_PROVIDER_WEBHOOK_SECRET").ok(),
            webhook_tolerance_secs: env::var("WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(WEBHOOK_TOLERANCE_SECS),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long"
            ));
        }
        if self.freshness_threshold_secs <= 0 {
            return Err(anyhow::anyhow!("FRESHNESS_THRESHOLD_SECS must be positive"));
        }
        if self.free_trial_days < 0 {
            return Err(anyhow::anyhow!("FREE_TRIAL_DAYS cannot be negative"));
        }
        if self.verifier_timeout_secs == 0 {
            return Err(anyhow::anyhow!("VERIFIER_TIMEOUT_SECS must be positive"));
        }
        if self.change_channel_name.is_empty()
            || !self
                .change_channel_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(anyhow::anyhow!(
                "CHANGE_CHANNEL_NAME must be a non-empty identifier"
            ));
        }
        if self.is_production() {
            if self.provider_secret_key.is_none() {
                return Err(anyhow::anyhow!(
                    "PAYMENT_PROVIDER_SECRET_KEY must be set in production"
                ));
            }
            if self.provider_webhook_secret.is_none() {
                return Err(anyhow::anyhow!(
                    "PAYMENT_PROVIDER_WEBHOOK_SECRET must be set in production"
                ));
            }
        }
        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::from_secs(self.freshness_threshold_secs)
    }

    pub fn resolver(&self) -> AccessResolver {
        AccessResolver::new(self.free_trial_days)
    }

    pub fn verifier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.verifier_timeout_secs)
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::seconds(self.webhook_tolerance_secs)
    }
}
