//! Shared constants.

/// Length of the free trial granted from `trial_started_at`.
pub const FREE_TRIAL_DAYS: i64 = 7;

/// How long a cached access decision may be trusted without re-verification.
pub const FRESHNESS_THRESHOLD_SECS: i64 = 5 * 60;

/// Upper bound for a single round trip to the verification endpoint or provider.
pub const VERIFIER_TIMEOUT_SECS: u64 = 10;

/// Accepted clock skew for payment-provider webhook signatures.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Postgres NOTIFY channel carrying subscription row changes.
pub const CHANGE_CHANNEL_NAME: &str = "subscription_changes";

/// Milliseconds in one day, used for ceiling day arithmetic.
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Status string reported by verification when the user has no subscription on file.
pub const STATUS_NONE: &str = "none";
