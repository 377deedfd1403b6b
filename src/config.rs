//! Configuration for the authentication subsystem.
//!
//! Every section deserializes with defaults filled in, so an embedding
//! service only has to spell out what it changes. Durations use humantime
//! notation (`"15m"`, `"30days"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth.tokens]
//! issuer = "https://auth.example.com"
//! access_token_ttl = "10m"
//!
//! [auth.lockout]
//! max_attempts = 3
//!
//! [auth.failure_policy]
//! revocation_check = "closed"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::credentials::LockoutConfig;
use crate::rate_limit::RateLimiterConfig;
use crate::signature::SignatureConfig;
use crate::token::TokenConfig;

/// What to do when the counter cache cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Let the request through (availability first).
    #[default]
    Open,
    /// Deny the request (strictness first).
    Closed,
}

impl FailMode {
    /// True when an unavailable cache should result in a denial.
    pub fn denies(self) -> bool {
        matches!(self, FailMode::Closed)
    }
}

/// Per-operation behavior on counter-cache outages.
///
/// `Closed` means: treat the token as revoked, reject the rate-limited
/// request, treat the account as locked.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FailurePolicy {
    pub revocation_check: FailMode,
    pub rate_limit: FailMode,
    pub lockout_check: FailMode,
}

impl FailurePolicy {
    /// Every check fails closed.
    pub fn strict() -> Self {
        Self {
            revocation_check: FailMode::Closed,
            rate_limit: FailMode::Closed,
            lockout_check: FailMode::Closed,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access token signing and validation.
    pub tokens: TokenConfig,

    /// How long a session (and so its refresh token) stays usable after
    /// login or the last refresh.
    #[serde(with = "humantime_serde")]
    pub session_duration: Duration,

    /// Failed-login lockout.
    pub lockout: LockoutConfig,

    /// Authentication request rate limiting.
    pub rate_limit: RateLimiterConfig,

    /// HTTP signature verification.
    pub signature: SignatureConfig,

    /// Cache outage behavior.
    pub failure_policy: FailurePolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: TokenConfig::default(),
            session_duration: Duration::from_secs(30 * 24 * 3600), // 30 days
            lockout: LockoutConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            signature: SignatureConfig::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl AuthConfig {
    pub fn with_tokens(mut self, tokens: TokenConfig) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    pub fn with_lockout(mut self, lockout: LockoutConfig) -> Self {
        self.lockout = lockout;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_signature(mut self, signature: SignatureConfig) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
