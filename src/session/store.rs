//! Session storage trait and session types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Where a request came from. Recorded on sessions and audit events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Server-side record binding a user to the current refresh token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// Current refresh token. Unique across all sessions.
    pub refresh_token: String,

    /// When the session expires (Unix timestamp)
    pub expires_at: i64,

    /// When the session was created (Unix timestamp)
    pub created_at: i64,

    pub ip_address: String,

    pub user_agent: String,
}

impl Session {
    /// Create a session for `user_id` lasting `duration` from now.
    pub fn new(
        user_id: impl Into<String>,
        refresh_token: impl Into<String>,
        duration: Duration,
        client: &ClientInfo,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: format!("sess_{}", uuid::Uuid::new_v4().simple()),
            user_id: user_id.into(),
            refresh_token: refresh_token.into(),
            expires_at: now.saturating_add(duration_secs(duration)),
            created_at: now,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        }
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now >= self.expires_at
    }

    /// Get remaining session time in seconds.
    pub fn remaining_seconds(&self) -> i64 {
        let now = chrono::Utc::now().timestamp();
        (self.expires_at - now).max(0)
    }
}

// Keeps refresh tokens out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("ip_address", &self.ip_address)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Trait for session storage backends.
///
/// Implement this trait to use custom storage backends (PostgreSQL, Redis,
/// etc.). Failures should surface as [`AuthError::StorageUnavailable`].
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails if the id or refresh token is taken.
    fn create(&self, session: &Session) -> AuthResult<()>;

    /// Get a session by id.
    fn get(&self, id: &str) -> AuthResult<Option<Session>>;

    /// Get the session currently holding `refresh_token`.
    fn get_by_refresh_token(&self, refresh_token: &str) -> AuthResult<Option<Session>>;

    /// Get all sessions of a user, expired ones included.
    fn get_by_user(&self, user_id: &str) -> AuthResult<Vec<Session>>;

    /// Overwrite a session. Returns false if it no longer exists.
    fn update(&self, session: &Session) -> AuthResult<bool>;

    /// Swap the refresh token of session `id` from `expected` to `new` and
    /// set its expiry, only if `expected` is still current.
    ///
    /// Returns false when the session is gone or was rotated concurrently.
    /// The default goes through `get` + `update` and is not atomic; backends
    /// that can compare-and-swap should override it.
    fn replace_refresh_token(
        &self,
        id: &str,
        expected: &str,
        new: &str,
        expires_at: i64,
    ) -> AuthResult<bool> {
        match self.get(id)? {
            Some(mut session) if session.refresh_token == expected => {
                session.refresh_token = new.to_string();
                session.expires_at = expires_at;
                self.update(&session)
            }
            _ => Ok(false),
        }
    }

    /// Get a session by id, returning an error if not found or expired.
    fn get_valid(&self, id: &str) -> AuthResult<Session> {
        match self.get(id)? {
            Some(session) if session.is_expired() => Err(AuthError::SessionExpired),
            Some(session) => Ok(session),
            None => Err(AuthError::SessionNotFound),
        }
    }

    /// Delete a session by id.
    fn delete(&self, id: &str) -> AuthResult<bool>;

    /// Delete all sessions for a user.
    fn delete_by_user(&self, user_id: &str) -> AuthResult<u64>;

    /// Remove all expired sessions.
    fn delete_expired(&self) -> AuthResult<u64>;

    /// Count active (non-expired) sessions.
    fn count_active(&self) -> AuthResult<u64>;
}

/// High-level session manager wrapping a [`SessionStore`].
///
/// Owns the session lifecycle: creation at login, refresh-token rotation,
/// termination at logout and the expired-session sweep.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    /// Lifetime granted at login and at every refresh
    session_duration: Duration,
}

impl SessionManager {
    /// Create a new session manager with the given store.
    pub fn new(store: Arc<dyn SessionStore>, session_duration: Duration) -> Self {
        Self {
            store,
            session_duration,
        }
    }

    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Create and persist a session holding `refresh_token`.
    pub fn create_session(
        &self,
        user_id: &str,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> AuthResult<Session> {
        let session = Session::new(user_id, refresh_token, self.session_duration, client);
        self.store.create(&session)?;
        tracing::debug!(session_id = %session.id, user_id = %user_id, "Session created");
        Ok(session)
    }

    /// Resolve a refresh token to its live session.
    pub fn validate_refresh_token(&self, refresh_token: &str) -> AuthResult<Session> {
        match self.store.get_by_refresh_token(refresh_token)? {
            Some(session) if session.is_expired() => Err(AuthError::SessionExpired),
            Some(session) => Ok(session),
            None => Err(AuthError::InvalidRefreshToken),
        }
    }

    /// Replace the session's refresh token with `new_refresh_token` and push
    /// its expiry to now + session duration.
    ///
    /// The old token stops working immediately. If another refresh won the
    /// race for the same token, this one fails with `InvalidRefreshToken`.
    pub fn rotate(&self, session: &Session, new_refresh_token: &str) -> AuthResult<Session> {
        let expires_at = chrono::Utc::now()
            .timestamp()
            .saturating_add(duration_secs(self.session_duration));

        let swapped = self.store.replace_refresh_token(
            &session.id,
            &session.refresh_token,
            new_refresh_token,
            expires_at,
        )?;
        if !swapped {
            tracing::warn!(
                session_id = %session.id,
                user_id = %session.user_id,
                "Refresh token rotated concurrently"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        let mut rotated = session.clone();
        rotated.refresh_token = new_refresh_token.to_string();
        rotated.expires_at = expires_at;
        Ok(rotated)
    }

    /// Get a session by id.
    pub fn get(&self, id: &str) -> AuthResult<Option<Session>> {
        self.store.get(id)
    }

    /// Get a session by id, failing if missing or expired.
    pub fn validate(&self, id: &str) -> AuthResult<Session> {
        self.store.get_valid(id)
    }

    /// Invalidate (delete) a session.
    pub fn invalidate(&self, id: &str) -> AuthResult<bool> {
        self.store.delete(id)
    }

    /// Invalidate all sessions for a user.
    pub fn invalidate_all_for_user(&self, user_id: &str) -> AuthResult<u64> {
        self.store.delete_by_user(user_id)
    }

    /// All sessions of a user, expired ones included.
    pub fn all_user_sessions(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        self.store.get_by_user(user_id)
    }

    /// Get all active sessions for a user.
    pub fn user_sessions(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        Ok(self
            .store
            .get_by_user(user_id)?
            .into_iter()
            .filter(|s| !s.is_expired())
            .collect())
    }

    /// Run cleanup to remove expired sessions.
    pub fn cleanup(&self) -> AuthResult<u64> {
        let removed = self.store.delete_expired()?;
        if removed > 0 {
            tracing::info!(removed, "Expired sessions removed");
        }
        Ok(removed)
    }

    pub fn count_active(&self) -> AuthResult<u64> {
        self.store.count_active()
    }

    /// Get underlying store reference.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

pub(crate) fn duration_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
