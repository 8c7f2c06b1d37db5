use chrono::Duration;

/// Runtime configuration for token issue and verification.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret (HS256).
    pub secret: String,
    /// Lifetime of issued access tokens.
    pub ttl: Duration,
    /// Allowable clock skew in seconds when validating exp.
    pub leeway_seconds: u32,
}

/// Fixed access-token lifetime: 12 hours.
pub const DEFAULT_TTL_HOURS: i64 = 12;

impl JwtConfig {
    /// Construct config with the fixed 12 h TTL and 30 second leeway.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            leeway_seconds: 30,
        }
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}
