//! The authentication orchestrator.
//!
//! [`AuthService`] wires the rate limiter, lockout manager, token manager,
//! session manager and signature verifier together and audits every outcome.
//! Outer HTTP handlers call into it and map [`AuthError`] to a response with
//! [`AuthError::http_status_code`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gatekeep::prelude::*;
//!
//! let service = AuthService::new(
//!     AuthConfig::default(),
//!     b"a-signing-secret-of-at-least-32-bytes",
//!     Arc::new(users),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(TracingAuditSink),
//! )?;
//!
//! let client = ClientInfo::new("203.0.113.7", "loan-portal/2.1");
//! let tokens = service.login("jane@example.com", "correct horse", &client)?;
//! let ctx = service.validate_access_token(&tokens.access_token)?;
//! service.authorize(&ctx, Permission::SubmitApplication)?;
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{security_events, AuditSink, AuthEvent, AuthEventType, SecurityEvent, Severity};
use crate::cache::CounterCache;
use crate::config::AuthConfig;
use crate::credentials::{verify_password, LockoutManager};
use crate::error::{AuthError, AuthResult};
use crate::rate_limit::RateLimiter;
use crate::session::{ClientInfo, Session, SessionManager, SessionStore};
use crate::signature::{HttpSignatureVerifier, KeyStore, SignedRequest, StaticKeyStore};
use crate::token::TokenManager;
use crate::user::{Permission, Role, User, UserInfo, UserStore};
use crate::validation::{validate_email, validate_password, validate_refresh_token};

/// Tokens handed back after a login or refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Access token expiry (Unix seconds)
    pub expires_at: i64,
    pub session_id: String,
    pub user: UserInfo,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("session_id", &self.session_id)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Identity established by a valid access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub session_id: String,
    pub token_id: String,
    /// Access token expiry (Unix seconds)
    pub expires_at: i64,
}

impl AuthContext {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }

    /// Unknown roles have no permissions.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role()
            .map(|role| role.has_permission(permission))
            .unwrap_or(false)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role() == Some(role)
    }
}

/// Authentication orchestrator.
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    sessions: SessionManager,
    tokens: TokenManager,
    lockout: LockoutManager,
    rate_limiter: RateLimiter,
    signatures: HttpSignatureVerifier,
    audit: Arc<dyn AuditSink>,
}

impl AuthService {
    /// Build the service from its collaborators.
    ///
    /// No signing keys are registered until [`with_key_store`](Self::with_key_store)
    /// is called, so every signed request fails with `KeyNotFound` until then.
    ///
    /// # Errors
    ///
    /// Returns an error if `secret` is shorter than 32 bytes.
    pub fn new(
        config: AuthConfig,
        secret: &[u8],
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        cache: Arc<dyn CounterCache>,
        audit: Arc<dyn AuditSink>,
    ) -> AuthResult<Self> {
        let policy = config.failure_policy;

        let tokens = TokenManager::new(secret, config.tokens.clone(), cache.clone())?
            .with_revocation_fail_mode(policy.revocation_check);
        let lockout = LockoutManager::new(cache.clone(), config.lockout.clone())
            .with_fail_mode(policy.lockout_check);
        let rate_limiter = RateLimiter::new(cache, config.rate_limit.clone())
            .with_fail_mode(policy.rate_limit);
        let signatures =
            HttpSignatureVerifier::new(Arc::new(StaticKeyStore::new()), config.signature.clone());

        Ok(Self {
            sessions: SessionManager::new(sessions, config.session_duration),
            config,
            users,
            tokens,
            lockout,
            rate_limiter,
            signatures,
            audit,
        })
    }

    /// Use `keys` to resolve HTTP signature key ids.
    pub fn with_key_store(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.signatures = HttpSignatureVerifier::new(keys, self.config.signature.clone());
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn lockout(&self) -> &LockoutManager {
        &self.lockout
    }

    // ---- login / refresh / logout -------------------------------------------

    /// Authenticate with email and password and open a new session.
    ///
    /// Unknown emails and wrong passwords both fail with
    /// `InvalidCredentials`. Every failure is audited as `failed_login`.
    pub fn login(&self, email: &str, password: &str, client: &ClientInfo) -> AuthResult<TokenResponse> {
        self.check_rate_limit(rate_limit_identifier(client), client)?;

        if validate_email(email).is_err() || validate_password(password).is_err() {
            return Err(self.login_failed("", email, client, AuthError::InvalidCredentials));
        }

        let user = match self.users.get_by_email(email) {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::debug!(ip_address = %client.ip_address, "Login for unknown email");
                return Err(self.login_failed("", email, client, AuthError::InvalidCredentials));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to get user by email");
                return Err(self.login_failed("", email, client, e));
            }
        };

        if self.lockout.check_lockout(&user.id) {
            tracing::warn!(user_id = %user.id, "Login attempt on locked account");
            return Err(self.login_failed(&user.id, email, client, AuthError::AccountLocked));
        }

        if !verify_password(password, &user.password_hash) {
            tracing::warn!(user_id = %user.id, "Invalid password");
            self.record_failed_attempt(&user, client);
            return Err(self.login_failed(&user.id, email, client, AuthError::InvalidCredentials));
        }

        if !user.status.is_active() {
            tracing::warn!(user_id = %user.id, status = user.status.as_str(), "Account not active");
            return Err(self.login_failed(&user.id, email, client, AuthError::AccountDisabled));
        }

        if let Err(e) = self.lockout.clear_failures(&user.id) {
            tracing::error!(user_id = %user.id, error = %e, "Failed to clear failed attempts");
        }

        let session = self
            .create_session(&user.id, client)
            .map_err(|e| self.login_failed(&user.id, email, client, e))?;
        let response = self
            .token_response(&user, &session)
            .map_err(|e| self.login_failed(&user.id, email, client, e))?;

        if let Err(e) = self.update_last_login(&user.id) {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to update last login");
        }

        self.audit_auth(
            AuthEvent::new(AuthEventType::Login, user.id.as_str(), client).with_session(session.id.as_str()),
        );
        tracing::info!(user_id = %user.id, session_id = %session.id, "User logged in");

        Ok(response)
    }

    /// Exchange a refresh token for a new access token and a rotated refresh
    /// token. The presented token stops working immediately.
    pub fn refresh_token(&self, refresh_token: &str, client: &ClientInfo) -> AuthResult<TokenResponse> {
        let session = self
            .validate_refresh_token(refresh_token)
            .map_err(|e| self.refresh_failed("", None, client, e))?;

        let session_id = session.id.as_str();
        let user = match self.users.get_by_id(&session.user_id) {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::error!(user_id = %session.user_id, "Session owner no longer exists");
                let err = AuthError::UserNotFound;
                return Err(self.refresh_failed(&session.user_id, Some(session_id), client, err));
            }
            Err(e) => {
                return Err(self.refresh_failed(&session.user_id, Some(session_id), client, e));
            }
        };

        if !user.status.is_active() {
            tracing::warn!(user_id = %user.id, "Refresh for inactive account");
            let err = AuthError::AccountDisabled;
            return Err(self.refresh_failed(&user.id, Some(session_id), client, err));
        }

        let rotated = self
            .tokens
            .issue_refresh_token()
            .and_then(|new_token| self.sessions.rotate(&session, &new_token))
            .map_err(|e| self.refresh_failed(&user.id, Some(session_id), client, e))?;

        let response = self
            .token_response(&user, &rotated)
            .map_err(|e| self.refresh_failed(&user.id, Some(session_id), client, e))?;

        self.audit_auth(
            AuthEvent::new(AuthEventType::Refresh, user.id.as_str(), client).with_session(rotated.id.as_str()),
        );
        tracing::info!(user_id = %user.id, session_id = %rotated.id, "Token refreshed");

        Ok(response)
    }

    /// End one session of `user_id`.
    ///
    /// Ending a session that is already gone succeeds. Ending another user's
    /// session fails with `InsufficientPermissions`.
    pub fn logout(&self, user_id: &str, session_id: &str, client: &ClientInfo) -> AuthResult<()> {
        match self.sessions.get(session_id)? {
            Some(session) if session.user_id != user_id => {
                tracing::warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    "Attempt to end a session owned by another user"
                );
                self.audit_security(
                    SecurityEvent::new(
                        security_events::LOGOUT_DENIED,
                        Severity::Medium,
                        "Attempt to end a session owned by another user",
                        client,
                    )
                    .with_user(user_id)
                    .with_metadata("session_id", session_id)
                    .with_metadata("session_owner", session.user_id.as_str()),
                );
                return Err(AuthError::InsufficientPermissions);
            }
            Some(_) => {
                self.sessions.invalidate(session_id)?;
            }
            None => {
                tracing::debug!(session_id = %session_id, "Logout for absent session");
            }
        }

        self.audit_auth(AuthEvent::new(AuthEventType::Logout, user_id, client).with_session(session_id));
        tracing::info!(user_id = %user_id, session_id = %session_id, "User logged out");
        Ok(())
    }

    /// End every session of `user_id`. Returns how many were removed.
    pub fn logout_all(&self, user_id: &str, client: &ClientInfo) -> AuthResult<u64> {
        let sessions = self.sessions.all_user_sessions(user_id)?;
        let removed = self.sessions.invalidate_all_for_user(user_id)?;

        if sessions.is_empty() {
            self.audit_auth(AuthEvent::new(AuthEventType::LogoutAll, user_id, client));
        }
        for session in &sessions {
            self.audit_auth(
                AuthEvent::new(AuthEventType::LogoutAll, user_id, client).with_session(session.id.as_str()),
            );
        }

        tracing::info!(user_id = %user_id, sessions = removed, "All user sessions logged out");
        Ok(removed)
    }

    // ---- token checks --------------------------------------------------------

    /// Validate an access token and the session behind it.
    pub fn validate_access_token(&self, token: &str) -> AuthResult<AuthContext> {
        let claims = self.tokens.validate_access_token(token)?;

        if self.tokens.is_token_id_revoked(&claims.token_id) {
            self.audit_security(
                SecurityEvent::new(
                    security_events::REVOKED_TOKEN_USED,
                    Severity::Medium,
                    "Revoked access token presented",
                    &ClientInfo::default(),
                )
                .with_user(claims.user_id.as_str())
                .with_metadata("token_id", claims.token_id.as_str())
                .with_metadata("session_id", claims.session_id.as_str()),
            );
            return Err(AuthError::TokenRevoked);
        }

        let session = self
            .sessions
            .get(&claims.session_id)?
            .filter(|s| s.user_id == claims.user_id)
            .ok_or(AuthError::SessionNotFound)?;
        if session.is_expired() {
            return Err(AuthError::SessionExpired);
        }

        Ok(AuthContext {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
            session_id: claims.session_id,
            token_id: claims.token_id,
            expires_at: claims.exp,
        })
    }

    /// Resolve a refresh token to its live session.
    pub fn validate_refresh_token(&self, refresh_token: &str) -> AuthResult<Session> {
        validate_refresh_token(refresh_token)?;
        self.sessions.validate_refresh_token(refresh_token)
    }

    /// Revoke an access token until it expires.
    pub fn revoke_access_token(&self, token: &str) -> AuthResult<()> {
        self.tokens.revoke(token)
    }

    // ---- rate limiting and signatures ----------------------------------------

    /// Count a request from `identifier` against the authentication rate
    /// limit.
    pub fn check_rate_limit(&self, identifier: &str, client: &ClientInfo) -> AuthResult<()> {
        self.rate_limiter.check(identifier).map_err(|e| {
            tracing::warn!(identifier = %identifier, "Rate limit exceeded");
            self.audit_security(
                SecurityEvent::new(
                    security_events::RATE_LIMIT_EXCEEDED,
                    Severity::Medium,
                    "Too many authentication requests",
                    client,
                )
                .with_metadata("identifier", identifier)
                .with_metadata("limit", self.rate_limiter.config().limit),
            );
            e
        })
    }

    /// Verify a signed machine-to-machine request. Returns the key id.
    pub fn validate_http_signature(
        &self,
        request: &SignedRequest<'_>,
        client: &ClientInfo,
    ) -> AuthResult<String> {
        self.signatures.verify(request).map_err(|e| {
            let severity = match &e {
                e if e.is_infrastructure() => Severity::Low,
                AuthError::KeyNotFound(_) | AuthError::ClockSkewExceeded(_) => Severity::Medium,
                _ => Severity::High,
            };
            self.audit_security(
                SecurityEvent::new(
                    security_events::INVALID_SIGNATURE,
                    severity,
                    e.to_string(),
                    client,
                )
                .with_metadata("method", request.method)
                .with_metadata("path", request.path)
                .with_metadata("error_code", e.code())
                .with_metadata("infrastructure", e.is_infrastructure()),
            );
            e
        })
    }

    // ---- authorization -------------------------------------------------------

    pub fn authorize(&self, ctx: &AuthContext, permission: Permission) -> AuthResult<()> {
        if ctx.has_permission(permission) {
            Ok(())
        } else {
            tracing::debug!(user_id = %ctx.user_id, permission = %permission, "Permission denied");
            Err(AuthError::InsufficientPermissions)
        }
    }

    /// Require the caller to hold one of `roles`.
    pub fn require_role(&self, ctx: &AuthContext, roles: &[Role]) -> AuthResult<()> {
        match ctx.role() {
            Some(role) if roles.contains(&role) => Ok(()),
            _ => Err(AuthError::InsufficientPermissions),
        }
    }

    // ---- passthroughs --------------------------------------------------------

    pub fn get_user_by_id(&self, user_id: &str) -> AuthResult<User> {
        self.users.get_by_id(user_id)?.ok_or(AuthError::UserNotFound)
    }

    pub fn get_user_by_email(&self, email: &str) -> AuthResult<User> {
        self.users.get_by_email(email)?.ok_or(AuthError::UserNotFound)
    }

    pub fn update_last_login(&self, user_id: &str) -> AuthResult<()> {
        self.users
            .update_last_login(user_id, chrono::Utc::now().timestamp())
    }

    /// Open a session for `user_id` with a fresh refresh token.
    pub fn create_session(&self, user_id: &str, client: &ClientInfo) -> AuthResult<Session> {
        let refresh_token = self.tokens.issue_refresh_token()?;
        self.sessions.create_session(user_id, &refresh_token, client)
    }

    pub fn get_session(&self, session_id: &str) -> AuthResult<Session> {
        self.sessions.get(session_id)?.ok_or(AuthError::SessionNotFound)
    }

    /// Active sessions of a user.
    pub fn user_sessions(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        self.sessions.user_sessions(user_id)
    }

    pub fn invalidate_session(&self, session_id: &str) -> AuthResult<()> {
        self.sessions.invalidate(session_id)?;
        Ok(())
    }

    pub fn invalidate_user_sessions(&self, user_id: &str) -> AuthResult<u64> {
        self.sessions.invalidate_all_for_user(user_id)
    }

    /// Delete expired sessions. Safe to run from several instances at once.
    pub fn clean_expired_sessions(&self) -> AuthResult<u64> {
        self.sessions.cleanup()
    }

    pub fn count_active_sessions(&self) -> AuthResult<u64> {
        self.sessions.count_active()
    }

    pub fn log_security_event(&self, event: &SecurityEvent) -> AuthResult<()> {
        self.audit.log_security_event(event)
    }

    // ---- helpers -------------------------------------------------------------

    fn token_response(&self, user: &User, session: &Session) -> AuthResult<TokenResponse> {
        let (access_token, expires_at) = self.tokens.issue_access_token(user, &session.id)?;
        let now = chrono::Utc::now().timestamp();

        Ok(TokenResponse {
            access_token,
            refresh_token: session.refresh_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (expires_at - now).max(0),
            expires_at,
            session_id: session.id.clone(),
            user: user.info(),
        })
    }

    fn record_failed_attempt(&self, user: &User, client: &ClientInfo) {
        match self.lockout.record_failure(&user.id) {
            Ok(record) if record.locked => {
                self.audit_security(
                    SecurityEvent::new(
                        security_events::ACCOUNT_LOCKED,
                        Severity::High,
                        "Account locked after repeated failed logins",
                        client,
                    )
                    .with_user(user.id.as_str())
                    .with_metadata("attempts", record.attempts)
                    .with_metadata(
                        "lockout_seconds",
                        self.lockout.config().duration.as_secs(),
                    ),
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Failed to record failed attempt");
            }
        }
    }

    fn login_failed(&self, user_id: &str, email: &str, client: &ClientInfo, error: AuthError) -> AuthError {
        self.audit_auth(
            AuthEvent::new(AuthEventType::FailedLogin, user_id, client)
                .failed(&error)
                .with_metadata("email", email),
        );
        error
    }

    fn refresh_failed(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        client: &ClientInfo,
        error: AuthError,
    ) -> AuthError {
        let mut event = AuthEvent::new(AuthEventType::Refresh, user_id, client).failed(&error);
        if let Some(id) = session_id {
            event = event.with_session(id);
        }
        self.audit_auth(event);
        error
    }

    fn audit_auth(&self, event: AuthEvent) {
        if let Err(e) = self.audit.log_auth_event(&event) {
            tracing::error!(event_type = event.event_type.as_str(), error = %e, "Failed to write auth event");
        }
    }

    fn audit_security(&self, event: SecurityEvent) {
        if let Err(e) = self.audit.log_security_event(&event) {
            tracing::error!(event_type = %event.event_type, error = %e, "Failed to write security event");
        }
    }
}

fn rate_limit_identifier(client: &ClientInfo) -> &str {
    if client.ip_address.is_empty() {
        "unknown"
    } else {
        &client.ip_address
    }
}
