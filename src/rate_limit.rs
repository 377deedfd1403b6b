//! Fixed-window rate limiting for authentication requests.
//!
//! Requests are counted per identifier (caller IP or user id) and scope in a
//! [`CounterCache`]. The window starts at the first request and is fixed, not
//! sliding: up to twice the limit can get through across the seam between two
//! windows. That is a known boundary behavior of the algorithm.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CounterCache;
use crate::config::FailMode;
use crate::error::{AuthError, AuthResult};

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum requests per window (default: 100)
    pub limit: u64,

    /// Window length (default: 1 hour)
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Logical scope the counters belong to (default: "auth")
    pub scope: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(3600),
            scope: "auth".to_string(),
        }
    }
}

impl RateLimiterConfig {
    /// Set the maximum number of requests per window.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Set the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the counter scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

/// Rate limiter backed by a shared [`CounterCache`].
///
/// # Example
///
/// ```rust
/// use gatekeep::cache::MemoryCache;
/// use gatekeep::rate_limit::{RateLimiter, RateLimiterConfig};
/// use std::sync::Arc;
///
/// let limiter = RateLimiter::new(
///     Arc::new(MemoryCache::new()),
///     RateLimiterConfig::default().with_limit(3),
/// );
///
/// assert!(limiter.check("192.168.1.1").is_ok());
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CounterCache>,
    config: RateLimiterConfig,
    fail_mode: FailMode,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration. Fails open.
    pub fn new(cache: Arc<dyn CounterCache>, config: RateLimiterConfig) -> Self {
        Self {
            cache,
            config,
            fail_mode: FailMode::Open,
        }
    }

    /// Set what happens when the cache is unavailable.
    pub fn with_fail_mode(mut self, mode: FailMode) -> Self {
        self.fail_mode = mode;
        self
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Count one request for `identifier` against the configured limit.
    ///
    /// Returns `Err(AuthError::RateLimitExceeded)` once the limit is passed.
    pub fn check(&self, identifier: &str) -> AuthResult<()> {
        if self.allow(identifier, self.config.limit, self.config.window) {
            Ok(())
        } else {
            Err(AuthError::RateLimitExceeded)
        }
    }

    /// Count one request for `identifier` and report whether it is allowed.
    ///
    /// The counter gets its TTL only on the first increment of a window, so
    /// later requests never push the window end out.
    pub fn allow(&self, identifier: &str, limit: u64, window: Duration) -> bool {
        let key = self.key(identifier);

        let count = match self.cache.increment(&key) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    identifier = %identifier,
                    scope = %self.config.scope,
                    error = %e,
                    "Rate limit counter unavailable"
                );
                return !self.fail_mode.denies();
            }
        };

        if count == 1 {
            match self.cache.set_expiration(&key, window) {
                Ok(true) => {}
                Ok(false) => tracing::warn!(key = %key, "Rate limit counter vanished before expiry was set"),
                Err(e) => tracing::error!(key = %key, error = %e, "Failed to set rate limit window"),
            }
        }

        let allowed = u64::try_from(count).map_or(false, |count| count <= limit);
        if !allowed {
            tracing::warn!(
                identifier = %identifier,
                scope = %self.config.scope,
                count,
                limit,
                "Rate limit exceeded"
            );
        }
        allowed
    }

    fn key(&self, identifier: &str) -> String {
        format!("rate_limit:{}:{}", self.config.scope, identifier)
    }
}
