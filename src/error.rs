//! Error types for the gatekeep library.

use thiserror::Error;

/// Result type alias for gatekeep operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication and authorization errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Email/password pair rejected. Also returned for unknown emails so the
    /// two cases cannot be told apart.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Too many failed logins; the account is temporarily locked
    #[error("Account is temporarily locked due to too many failed login attempts")]
    AccountLocked,

    /// Account exists but is not active
    #[error("Account is disabled")]
    AccountDisabled,

    /// Access token is malformed or its signature does not verify
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Access token is past its expiry
    #[error("Token has expired")]
    TokenExpired,

    /// Access token's not-before time is still in the future
    #[error("Token is not valid yet")]
    TokenNotYetValid,

    /// Access token was explicitly revoked
    #[error("Token has been revoked")]
    TokenRevoked,

    /// Refresh token is unknown (never issued, or already rotated away)
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Session not found
    #[error("Session not found")]
    SessionNotFound,

    /// Session has expired
    #[error("Session has expired")]
    SessionExpired,

    /// Rate limit exceeded
    #[error("Too many requests, rate limit exceeded")]
    RateLimitExceeded,

    /// HTTP signature verification failed
    #[error("Invalid HTTP signature")]
    InvalidSignature,

    /// Request carries no signature header
    #[error("Missing signature header")]
    MissingSignatureHeader,

    /// No signing key is registered under the given key id
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// Request date is missing, unparseable or outside the tolerance window
    #[error("Clock skew exceeded: {0}")]
    ClockSkewExceeded(String),

    /// Caller lacks the role or permission for the operation
    #[error("Insufficient permissions")]
    InsufficientPermissions,

    /// User referenced by a session no longer exists
    #[error("User not found")]
    UserNotFound,

    /// Session/user store or counter cache failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Request input is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns true if this error indicates the access token itself is unusable
    /// (as opposed to expired, revoked or rate limited)
    pub fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken(_) | AuthError::TokenNotYetValid | AuthError::InvalidRefreshToken
        )
    }

    /// Returns true if this error is due to expiration
    pub fn is_expired(&self) -> bool {
        matches!(self, AuthError::TokenExpired | AuthError::SessionExpired)
    }

    /// Returns true if this error is due to rate limiting
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AuthError::RateLimitExceeded)
    }

    /// Returns true if this error comes from infrastructure rather than the caller
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AuthError::StorageUnavailable(_) | AuthError::Internal(_))
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "AUTH_001",
            AuthError::AccountLocked => "AUTH_002",
            AuthError::AccountDisabled => "AUTH_003",
            AuthError::InvalidToken(_) => "AUTH_004",
            AuthError::TokenExpired => "AUTH_005",
            AuthError::TokenRevoked => "AUTH_006",
            AuthError::InvalidRefreshToken => "AUTH_007",
            AuthError::SessionNotFound => "AUTH_008",
            AuthError::SessionExpired => "AUTH_009",
            AuthError::RateLimitExceeded => "AUTH_010",
            AuthError::InvalidSignature => "AUTH_011",
            AuthError::MissingSignatureHeader => "AUTH_012",
            AuthError::KeyNotFound(_) => "AUTH_013",
            AuthError::ClockSkewExceeded(_) => "AUTH_014",
            AuthError::InsufficientPermissions => "AUTH_015",
            AuthError::UserNotFound => "AUTH_016",
            AuthError::StorageUnavailable(_) => "AUTH_017",
            AuthError::Internal(_) => "AUTH_019",
            AuthError::InvalidRequest(_) => "AUTH_020",
            AuthError::TokenNotYetValid => "AUTH_021",
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn http_status_code(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials => 401,
            AuthError::AccountLocked => 423,
            AuthError::AccountDisabled => 403,
            AuthError::InvalidToken(_) => 401,
            AuthError::TokenExpired => 401,
            AuthError::TokenNotYetValid => 401,
            AuthError::TokenRevoked => 401,
            AuthError::InvalidRefreshToken => 401,
            AuthError::SessionNotFound => 401,
            AuthError::SessionExpired => 401,
            AuthError::RateLimitExceeded => 429,
            AuthError::InvalidSignature => 401,
            AuthError::MissingSignatureHeader => 401,
            AuthError::KeyNotFound(_) => 401,
            AuthError::ClockSkewExceeded(_) => 401,
            AuthError::InsufficientPermissions => 403,
            AuthError::UserNotFound => 404,
            AuthError::StorageUnavailable(_) => 503,
            AuthError::InvalidRequest(_) => 400,
            AuthError::Internal(_) => 500,
        }
    }
}

#[cfg(feature = "session-sqlite")]
impl From<rusqlite::Error> for AuthError {
    fn from(err: rusqlite::Error) -> Self {
        AuthError::StorageUnavailable(err.to_string())
    }
}

#[cfg(feature = "session-sqlite")]
impl From<r2d2::Error> for AuthError {
    fn from(err: r2d2::Error) -> Self {
        AuthError::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            AuthError::InvalidCredentials,
            AuthError::AccountLocked,
            AuthError::AccountDisabled,
            AuthError::InvalidToken("x".into()),
            AuthError::TokenExpired,
            AuthError::TokenNotYetValid,
            AuthError::TokenRevoked,
            AuthError::InvalidRefreshToken,
            AuthError::SessionNotFound,
            AuthError::SessionExpired,
            AuthError::RateLimitExceeded,
            AuthError::InvalidSignature,
            AuthError::MissingSignatureHeader,
            AuthError::KeyNotFound("k".into()),
            AuthError::ClockSkewExceeded("late".into()),
            AuthError::InsufficientPermissions,
            AuthError::UserNotFound,
            AuthError::StorageUnavailable("down".into()),
            AuthError::InvalidRequest("bad".into()),
            AuthError::Internal("boom".into()),
        ];

        let mut codes: Vec<&str> = errors.iter().map(AuthError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_classification() {
        assert!(AuthError::TokenExpired.is_expired());
        assert!(AuthError::SessionExpired.is_expired());
        assert!(!AuthError::TokenRevoked.is_expired());
        assert!(AuthError::RateLimitExceeded.is_rate_limited());
        assert!(AuthError::InvalidToken("sig".into()).is_invalid_token());
        assert!(AuthError::StorageUnavailable("redis".into()).is_infrastructure());
        assert!(!AuthError::InvalidCredentials.is_infrastructure());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidCredentials.http_status_code(), 401);
        assert_eq!(AuthError::AccountLocked.http_status_code(), 423);
        assert_eq!(AuthError::RateLimitExceeded.http_status_code(), 429);
        assert_eq!(AuthError::InsufficientPermissions.http_status_code(), 403);
        assert_eq!(AuthError::StorageUnavailable("db".into()).http_status_code(), 503);
    }
}
