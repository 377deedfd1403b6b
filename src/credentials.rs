//! Password verification and failed-login lockout.
//!
//! Failures are counted per user in the [`CounterCache`]. When the count
//! reaches `max_attempts` a lockout flag is written; both the counter and the
//! flag live for `duration`. The lockout is fixed: failures while locked are
//! never counted because the caller rejects the login before checking the
//! password.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CounterCache;
use crate::config::FailMode;
use crate::error::{AuthError, AuthResult};

/// Lockout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Failed attempts before the account is locked (default: 5)
    pub max_attempts: u32,

    /// How long failures are remembered and how long a lockout lasts
    /// (default: 15 minutes)
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            duration: Duration::from_secs(15 * 60),
        }
    }
}

impl LockoutConfig {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Outcome of recording a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    /// Failures in the current cycle, including this one.
    pub attempts: i64,
    /// Whether this failure triggered the lockout.
    pub locked: bool,
}

/// Tracks failed logins and enforces temporary lockout.
#[derive(Clone)]
pub struct LockoutManager {
    cache: Arc<dyn CounterCache>,
    config: LockoutConfig,
    fail_mode: FailMode,
}

impl LockoutManager {
    pub fn new(cache: Arc<dyn CounterCache>, config: LockoutConfig) -> Self {
        Self {
            cache,
            config,
            fail_mode: FailMode::Open,
        }
    }

    /// Set how [`check_lockout`](Self::check_lockout) answers when the cache
    /// is unavailable.
    pub fn with_fail_mode(mut self, mode: FailMode) -> Self {
        self.fail_mode = mode;
        self
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Returns true if the account is currently locked.
    pub fn check_lockout(&self, user_id: &str) -> bool {
        match self.cache.exists(&lockout_key(user_id)) {
            Ok(locked) => locked,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to check lockout status");
                self.fail_mode.denies()
            }
        }
    }

    /// Count a failed login, locking the account once the maximum is reached.
    pub fn record_failure(&self, user_id: &str) -> AuthResult<FailureRecord> {
        let key = attempts_key(user_id);
        let attempts = self.cache.increment(&key)?;

        if attempts == 1 {
            if let Err(e) = self.cache.set_expiration(&key, self.config.duration) {
                tracing::error!(user_id = %user_id, error = %e, "Failed to set failed-attempt expiry");
            }
        }

        let locked = attempts >= i64::from(self.config.max_attempts);
        if locked {
            self.cache.set(&lockout_key(user_id), "1", self.config.duration)?;
            tracing::warn!(
                user_id = %user_id,
                attempts,
                "Account locked due to failed attempts"
            );
        }

        Ok(FailureRecord { attempts, locked })
    }

    /// Forget failed attempts after a successful login. An existing lockout
    /// flag is left to expire on its own.
    pub fn clear_failures(&self, user_id: &str) -> AuthResult<()> {
        self.cache.delete(&attempts_key(user_id))
    }

    /// Current failure count, zero if none are recorded.
    pub fn attempt_count(&self, user_id: &str) -> AuthResult<i64> {
        Ok(self
            .cache
            .get(&attempts_key(user_id))?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
}

fn attempts_key(user_id: &str) -> String {
    format!("failed_attempts:{}", user_id)
}

fn lockout_key(user_id: &str) -> String {
    format!("lockout:{}", user_id)
}

/// Compare a password against a bcrypt hash.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match bcrypt::verify(password, password_hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::error!(error = %e, "Stored password hash is unusable");
            false
        }
    }
}

/// Hash a password with bcrypt at the given cost.
pub fn hash_password(password: &str, cost: u32) -> AuthResult<String> {
    bcrypt::hash(password, cost)
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {}", e)))
}
