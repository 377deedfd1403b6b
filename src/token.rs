//! Access and refresh token lifecycle.
//!
//! Access tokens are HS256 JWTs signed with the service secret. They are
//! verified by signature alone; whether they are still *usable* also depends
//! on the revocation list kept in the [`CounterCache`] and on the session
//! they reference.
//!
//! Refresh tokens are opaque random strings with no embedded claims. All of
//! their context comes from the session record they are stored against.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::cache::CounterCache;
use crate::config::FailMode;
use crate::error::{AuthError, AuthResult};
use crate::user::User;
use crate::{MAX_TOKEN_LENGTH, MIN_SECRET_LENGTH};

const REFRESH_TOKEN_BYTES: usize = 32;
const TOKEN_ID_BYTES: usize = 16;

/// Access token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// `iss` claim written and required (default: "gatekeep")
    pub issuer: String,

    /// `aud` claim written and required (default: "api")
    pub audience: String,

    /// Access token lifetime (default: 15 minutes)
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Tolerance applied to `exp` and `nbf` (default: none)
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "gatekeep".to_string(),
            audience: "api".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            leeway: Duration::ZERO,
        }
    }
}

impl TokenConfig {
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(rename = "sub")]
    pub user_id: String,

    pub email: String,

    pub role: String,

    /// Session the token was issued for
    #[serde(rename = "sid")]
    pub session_id: String,

    /// Unique token identifier, the revocation list key
    #[serde(rename = "jti")]
    pub token_id: String,

    pub iss: String,

    pub aud: String,

    /// Issued-at (Unix seconds)
    pub iat: i64,

    /// Not-before (Unix seconds)
    pub nbf: i64,

    /// Expiry (Unix seconds)
    pub exp: i64,
}

impl AccessClaims {
    /// Check if the token has expired at `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }

    /// Remaining validity in seconds at `now`
    pub fn remaining_seconds(&self, now: i64) -> i64 {
        (self.exp - now).max(0)
    }
}

/// Issues, validates and revokes tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: TokenConfig,
    cache: Arc<dyn CounterCache>,
    revocation_fail_mode: FailMode,
}

impl TokenManager {
    /// Create a token manager signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn new(
        secret: &[u8],
        config: TokenConfig,
        cache: Arc<dyn CounterCache>,
    ) -> AuthResult<Self> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(AuthError::InvalidRequest(format!(
                "Signing key must be at least {} bytes ({} bits). Got {} bytes.",
                MIN_SECRET_LENGTH,
                MIN_SECRET_LENGTH * 8,
                secret.len()
            )));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            config,
            cache,
            revocation_fail_mode: FailMode::Open,
        })
    }

    /// Set how the revocation check answers when the cache is unavailable.
    pub fn with_revocation_fail_mode(mut self, mode: FailMode) -> Self {
        self.revocation_fail_mode = mode;
        self
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue an access token for `user` bound to `session_id`.
    ///
    /// Returns the token and its expiry (Unix seconds).
    pub fn issue_access_token(&self, user: &User, session_id: &str) -> AuthResult<(String, i64)> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.config.access_token_ttl.as_secs())
            .map_err(|_| AuthError::Internal("access token TTL out of range".to_string()))?;

        let claims = AccessClaims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            session_id: session_id.to_string(),
            token_id: random_urlsafe(TOKEN_ID_BYTES)?,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + ttl,
        };

        let token = self.sign(&claims)?;
        tracing::debug!(
            user_id = %claims.user_id,
            session_id = %claims.session_id,
            token_id = %claims.token_id,
            expires_at = claims.exp,
            "Access token issued"
        );
        Ok((token, claims.exp))
    }

    /// Generate an opaque refresh token: 256 random bits, base64url.
    pub fn issue_refresh_token(&self) -> AuthResult<String> {
        random_urlsafe(REFRESH_TOKEN_BYTES)
    }

    /// Validate an access token against the current time.
    ///
    /// Checks signature, expiry, not-before, issuer/audience and a non-empty
    /// subject. Does not consult the revocation list.
    pub fn validate_access_token(&self, token: &str) -> AuthResult<AccessClaims> {
        let claims = self.decode_claims(token, &self.validation(true))?;
        check_subject(claims)
    }

    /// Validate an access token as of `now` (Unix seconds).
    pub fn validate_at(&self, token: &str, now: i64) -> AuthResult<AccessClaims> {
        let claims = self.decode_claims(token, &self.validation(false))?;
        let leeway = self.leeway_secs();

        if now >= claims.exp.saturating_add(leeway) {
            return Err(AuthError::TokenExpired);
        }
        if now.saturating_add(leeway) < claims.nbf {
            return Err(AuthError::TokenNotYetValid);
        }
        check_subject(claims)
    }

    /// Check whether an authentic token has been revoked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token does not verify.
    pub fn is_revoked(&self, token: &str) -> AuthResult<bool> {
        let claims = self.decode_claims(token, &self.validation(false))?;
        Ok(self.is_token_id_revoked(&claims.token_id))
    }

    /// Look up a token id in the revocation list.
    ///
    /// With the default open policy an unavailable cache reads as "not
    /// revoked". The closed policy reads it as revoked.
    pub fn is_token_id_revoked(&self, token_id: &str) -> bool {
        match self.cache.exists(&revocation_key(token_id)) {
            Ok(revoked) => revoked,
            Err(e) => {
                tracing::error!(
                    token_id = %token_id,
                    error = %e,
                    fail_closed = self.revocation_fail_mode.denies(),
                    "Failed to check token revocation status"
                );
                self.revocation_fail_mode.denies()
            }
        }
    }

    /// Revoke an access token until its natural expiry.
    pub fn revoke(&self, token: &str) -> AuthResult<()> {
        self.revoke_at(token, chrono::Utc::now().timestamp())
    }

    /// Revoke an access token as of `now`.
    ///
    /// Only the signature is checked, so a token that is not valid yet can
    /// still be revoked. Revoking an expired token is a no-op.
    pub fn revoke_at(&self, token: &str, now: i64) -> AuthResult<()> {
        let claims = self.decode_claims(token, &self.validation(false))?;

        let remaining = claims.remaining_seconds(now);
        if remaining == 0 {
            tracing::debug!(token_id = %claims.token_id, "Token already expired, nothing to revoke");
            return Ok(());
        }

        let ttl = Duration::from_secs(remaining.unsigned_abs());
        self.cache
            .set(&revocation_key(&claims.token_id), "1", ttl)
            .map_err(|e| {
                tracing::error!(token_id = %claims.token_id, error = %e, "Failed to store revoked token");
                e
            })?;

        tracing::info!(token_id = %claims.token_id, user_id = %claims.user_id, "Token revoked");
        Ok(())
    }

    /// Sign a claim set into a compact token.
    ///
    /// **Note**: [`issue_access_token`](Self::issue_access_token) is the
    /// normal way to mint tokens; this is exposed for tooling and tests.
    pub fn sign(&self, claims: &AccessClaims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// HS256 only, issuer and audience pinned. With `check_times` the
    /// library also enforces `exp` and `nbf` against the system clock.
    fn validation(&self, check_times: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);
        validation.leeway = self.config.leeway.as_secs();
        // A token is expired at `exp`, not one second after
        validation.reject_tokens_expiring_in_less_than = 1;
        validation.validate_exp = check_times;
        validation.validate_nbf = check_times;
        validation
    }

    fn decode_claims(&self, token: &str, validation: &Validation) -> AuthResult<AccessClaims> {
        // Length check to prevent DoS
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(AuthError::InvalidToken(format!(
                "token exceeds maximum length of {} bytes",
                MAX_TOKEN_LENGTH
            )));
        }

        decode::<AccessClaims>(token, &self.decoding_key, validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    fn leeway_secs(&self) -> i64 {
        i64::try_from(self.config.leeway.as_secs()).unwrap_or(i64::MAX)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        ErrorKind::InvalidSignature => AuthError::InvalidToken("signature mismatch".to_string()),
        ErrorKind::InvalidAlgorithm => AuthError::InvalidToken("unsupported algorithm".to_string()),
        ErrorKind::InvalidIssuer => AuthError::InvalidToken("unexpected issuer".to_string()),
        ErrorKind::InvalidAudience => AuthError::InvalidToken("unexpected audience".to_string()),
        _ => AuthError::InvalidToken(err.to_string()),
    }
}

fn check_subject(claims: AccessClaims) -> AuthResult<AccessClaims> {
    if claims.user_id.is_empty() {
        return Err(AuthError::InvalidToken("missing subject".to_string()));
    }
    Ok(claims)
}

fn random_urlsafe(len: usize) -> AuthResult<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Internal(format!("random source unavailable: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn revocation_key(token_id: &str) -> String {
    format!("revoked_token:{}", token_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::BrokenCache;
    use crate::cache::MemoryCache;
    use crate::user::AccountStatus;

    // Test secret that meets the 32-byte minimum requirement
    const TEST_SECRET: &[u8; 32] = b"test-secret-key-32bytes-long!!!!";
    const TEST_SECRET_2: &[u8; 32] = b"another-secret-32-bytes-long!!!!";

    fn manager() -> TokenManager {
        TokenManager::new(TEST_SECRET, TokenConfig::default(), Arc::new(MemoryCache::new()))
            .unwrap()
    }

    fn test_user() -> User {
        User {
            id: "user-42".to_string(),
            email: "reviewer@example.com".to_string(),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            role: "manager".to_string(),
            status: AccountStatus::Active,
            created_at: 0,
            last_login_at: None,
        }
    }

    fn claims_at(now: i64, ttl: i64) -> AccessClaims {
        AccessClaims {
            user_id: "user-42".to_string(),
            email: "reviewer@example.com".to_string(),
            role: "manager".to_string(),
            session_id: "sess_1".to_string(),
            token_id: "jti-1".to_string(),
            iss: "gatekeep".to_string(),
            aud: "api".to_string(),
            iat: now,
            nbf: now,
            exp: now + ttl,
        }
    }

    #[test]
    fn test_issue_and_validate() {
        let tokens = manager();
        let (token, expires_at) = tokens.issue_access_token(&test_user(), "sess_9").unwrap();

        let claims = tokens.validate_access_token(&token).unwrap();
        assert_eq!(claims.user_id, "user-42");
        assert_eq!(claims.email, "reviewer@example.com");
        assert_eq!(claims.role, "manager");
        assert_eq!(claims.session_id, "sess_9");
        assert_eq!(claims.exp, expires_at);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        assert!(!claims.token_id.is_empty());
    }

    #[test]
    fn test_token_ids_unique() {
        let tokens = manager();
        let (a, _) = tokens.issue_access_token(&test_user(), "s").unwrap();
        let (b, _) = tokens.issue_access_token(&test_user(), "s").unwrap();
        let a = tokens.validate_access_token(&a).unwrap();
        let b = tokens.validate_access_token(&b).unwrap();
        assert_ne!(a.token_id, b.token_id);
    }

    #[test]
    fn test_secret_too_short() {
        let cache: Arc<dyn CounterCache> = Arc::new(MemoryCache::new());
        assert!(TokenManager::new(b"short", TokenConfig::default(), cache.clone()).is_err());
        assert!(TokenManager::new(b"exactly-32-bytes-secret-here!!!!", TokenConfig::default(), cache).is_ok());
    }

    #[test]
    fn test_expiry_timeline() {
        let tokens = manager();
        let now = 1_700_000_000;
        let token = tokens.sign(&claims_at(now, 600)).unwrap();

        assert!(tokens.validate_at(&token, now + 599).is_ok());
        assert!(matches!(
            tokens.validate_at(&token, now + 600),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            tokens.validate_at(&token, now + 601),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_not_before() {
        let tokens = manager();
        let now = 1_700_000_000;
        let mut claims = claims_at(now, 600);
        claims.nbf = now + 60;
        let token = tokens.sign(&claims).unwrap();

        assert!(matches!(
            tokens.validate_at(&token, now + 59),
            Err(AuthError::TokenNotYetValid)
        ));
        assert!(tokens.validate_at(&token, now + 60).is_ok());
    }

    #[test]
    fn test_clock_errors_against_system_time() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();

        let expired = tokens.sign(&claims_at(now - 3600, 600)).unwrap();
        assert!(matches!(
            tokens.validate_access_token(&expired),
            Err(AuthError::TokenExpired)
        ));

        let mut early = claims_at(now, 600);
        early.nbf = now + 300;
        let early = tokens.sign(&early).unwrap();
        assert!(matches!(
            tokens.validate_access_token(&early),
            Err(AuthError::TokenNotYetValid)
        ));
    }

    #[test]
    fn test_standard_jwt_header() {
        let tokens = manager();
        let (token, _) = tokens.issue_access_token(&test_user(), "s").unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
        assert_eq!(header.typ.as_deref(), Some("JWT"));
    }

    #[test]
    fn test_issuer_mismatch_rejected() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now, 600);
        claims.iss = "someone-else".to_string();
        let token = tokens.sign(&claims).unwrap();

        assert!(matches!(
            tokens.validate_access_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            tokens.validate_at(&token, now),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_leeway() {
        let tokens = TokenManager::new(
            TEST_SECRET,
            TokenConfig::default().with_leeway(Duration::from_secs(30)),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();
        let now = 1_700_000_000;
        let token = tokens.sign(&claims_at(now, 60)).unwrap();

        assert!(tokens.validate_at(&token, now + 80).is_ok());
        assert!(tokens.validate_at(&token, now + 90).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let tokens = manager();
        let other =
            TokenManager::new(TEST_SECRET_2, TokenConfig::default(), Arc::new(MemoryCache::new()))
                .unwrap();
        let (token, _) = other.issue_access_token(&test_user(), "s").unwrap();

        assert!(matches!(
            tokens.validate_access_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();
        let token = tokens.sign(&claims_at(now, 600)).unwrap();

        let mut forged = claims_at(now, 600);
        forged.role = "admin".to_string();
        let forged_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_b64, parts[2]);

        assert!(matches!(
            tokens.validate_access_token(&tampered),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_malformed_tokens() {
        let tokens = manager();

        for bad in ["", "invalidtoken", "a.b", "a.b.c.d", "!!!.???.###"] {
            assert!(
                matches!(tokens.validate_access_token(bad), Err(AuthError::InvalidToken(_))),
                "accepted {:?}",
                bad
            );
        }

        let long_token = "a".repeat(MAX_TOKEN_LENGTH + 1);
        assert!(matches!(
            tokens.validate_access_token(&long_token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_algorithm_none_rejected() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims_at(now, 600)).unwrap());

        assert!(matches!(
            tokens.validate_access_token(&format!("{}.{}.", header, claims)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now, 600);
        claims.user_id = String::new();
        let token = tokens.sign(&claims).unwrap();

        assert!(matches!(
            tokens.validate_access_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_audience_mismatch_rejected() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now, 600);
        claims.aud = "other-service".to_string();
        let token = tokens.sign(&claims).unwrap();

        assert!(matches!(
            tokens.validate_access_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_refresh_tokens() {
        let tokens = manager();
        let a = tokens.issue_refresh_token().unwrap();
        let b = tokens.issue_refresh_token().unwrap();

        assert_ne!(a, b);
        // 32 bytes, unpadded base64url
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_revocation() {
        let tokens = manager();
        let (token, _) = tokens.issue_access_token(&test_user(), "s").unwrap();

        assert!(!tokens.is_revoked(&token).unwrap());
        tokens.revoke(&token).unwrap();
        assert!(tokens.is_revoked(&token).unwrap());

        // Revoking twice is harmless
        tokens.revoke(&token).unwrap();
    }

    #[test]
    fn test_revoke_expired_is_noop() {
        let cache = MemoryCache::new();
        let tokens =
            TokenManager::new(TEST_SECRET, TokenConfig::default(), Arc::new(cache.clone())).unwrap();
        let now = chrono::Utc::now().timestamp();
        let token = tokens.sign(&claims_at(now - 3600, 600)).unwrap();

        tokens.revoke(&token).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_revoke_not_yet_valid() {
        let tokens = manager();
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now, 600);
        claims.nbf = now + 300;
        let token = tokens.sign(&claims).unwrap();

        tokens.revoke(&token).unwrap();
        assert!(tokens.is_revoked(&token).unwrap());
    }

    #[test]
    fn test_revoke_forged_token_fails() {
        let tokens = manager();
        assert!(matches!(
            tokens.revoke("a.b.c"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_revocation_entry_expires_with_token() {
        let cache = MemoryCache::new();
        let tokens =
            TokenManager::new(TEST_SECRET, TokenConfig::default(), Arc::new(cache.clone())).unwrap();
        let now = chrono::Utc::now().timestamp();
        let token = tokens.sign(&claims_at(now, 1)).unwrap();

        tokens.revoke_at(&token, now).unwrap();
        assert!(tokens.is_revoked(&token).unwrap());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(!tokens.is_revoked(&token).unwrap());
    }

    #[test]
    fn test_revocation_outage_policy() {
        let open =
            TokenManager::new(TEST_SECRET, TokenConfig::default(), Arc::new(BrokenCache)).unwrap();
        assert!(!open.is_token_id_revoked("jti"));

        let closed = open.clone().with_revocation_fail_mode(FailMode::Closed);
        assert!(closed.is_token_id_revoked("jti"));

        let (token, _) = open.issue_access_token(&test_user(), "s").unwrap();
        assert!(matches!(
            open.revoke(&token),
            Err(AuthError::StorageUnavailable(_))
        ));
    }
}
