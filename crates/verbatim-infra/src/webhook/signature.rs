//! Provider webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`.
//! Signed payload = `"{t}.{raw body}"`, MAC = HMAC-SHA256(webhook secret).

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use verbatim_core::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Parsed signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, AppError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        AppError::Unauthorized("Invalid webhook signature timestamp".to_string())
                    })?);
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::Unauthorized("Missing webhook signature timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(AppError::Unauthorized(
                "Missing webhook signature".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn compute(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signature header for `payload` at `timestamp`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, AppError> {
    Ok(format!("t={},v1={}", timestamp, compute(secret, timestamp, payload)?))
}

/// Check `header` against `payload`. The timestamp must be within `tolerance` of `now`.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let parsed = SignatureHeader::parse(header)?;

    let age = now.timestamp().abs_diff(parsed.timestamp);
    if age > tolerance.num_seconds().unsigned_abs() {
        tracing::warn!(
            timestamp = parsed.timestamp,
            age_secs = age,
            "Webhook signature timestamp outside tolerance"
        );
        return Err(AppError::Unauthorized(
            "Webhook signature timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if !matched {
        return Err(AppError::Unauthorized(
            "Webhook signature mismatch".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_test_secret";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_signed_payload_verifies() {
        let body = br#"{"type":"customer.subscription.updated"}"#;
        let header = sign_payload(SECRET, now().timestamp(), body).unwrap();
        assert!(verify_signature(SECRET, &header, body, Duration::minutes(5), now()).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign_payload(SECRET, now().timestamp(), b"{}").unwrap();
        let err = verify_signature(SECRET, &header, b"{ }", Duration::minutes(5), now());
        assert!(matches!(err, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign_payload("whsec_other", now().timestamp(), b"{}").unwrap();
        assert!(verify_signature(SECRET, &header, b"{}", Duration::minutes(5), now()).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let ts = (now() - Duration::minutes(6)).timestamp();
        let header = sign_payload(SECRET, ts, b"{}").unwrap();
        assert!(verify_signature(SECRET, &header, b"{}", Duration::minutes(5), now()).is_err());
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        for ts in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", ts);
            let err = verify_signature(SECRET, &header, b"{}", Duration::minutes(5), now());
            assert!(matches!(err, Err(AppError::Unauthorized(_))), "{}", ts);
        }
    }

    #[test]
    fn test_any_v1_signature_may_match() {
        let good = sign_payload(SECRET, now().timestamp(), b"{}").unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", now().timestamp(), good_sig);
        assert!(verify_signature(SECRET, &header, b"{}", Duration::minutes(5), now()).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(SignatureHeader::parse("v1=abc").is_err());
        assert!(SignatureHeader::parse("t=123").is_err());
        assert!(SignatureHeader::parse("t=abc,v1=00").is_err());
        let parsed = SignatureHeader::parse("t=5, v1=aa, v0=bb").unwrap();
        assert_eq!(parsed.timestamp, 5);
        assert_eq!(parsed.signatures, vec!["aa".to_string()]);
    }
}
