//! Audit events and sinks.
//!
//! Two event families are produced: [`AuthEvent`] for the login/logout/refresh
//! lifecycle of a user, and [`SecurityEvent`] for decisions worth a security
//! review (lockouts, tripped rate limits, rejected signatures, revoked token
//! reuse, attempts to end another user's session). Sink failures never change the outcome of the audited operation.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};
use crate::session::ClientInfo;

/// Security event type names.
pub mod security_events {
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    pub const INVALID_SIGNATURE: &str = "invalid_signature";
    pub const REVOKED_TOKEN_USED: &str = "revoked_token_used";
    pub const LOGOUT_DENIED: &str = "logout_denied";
}

/// Lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventType {
    Login,
    Logout,
    LogoutAll,
    Refresh,
    FailedLogin,
}

impl AuthEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventType::Login => "login",
            AuthEventType::Logout => "logout",
            AuthEventType::LogoutAll => "logout_all",
            AuthEventType::Refresh => "refresh",
            AuthEventType::FailedLogin => "failed_login",
        }
    }
}

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A login, logout or refresh, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub id: String,
    /// Empty when the user could not be resolved
    pub user_id: String,
    pub event_type: AuthEventType,
    pub session_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub error_code: Option<String>,
    pub metadata: Map<String, Value>,
    /// Unix seconds
    pub timestamp: i64,
}

impl AuthEvent {
    /// A successful event of `event_type`.
    pub fn new(event_type: AuthEventType, user_id: impl Into<String>, client: &ClientInfo) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            event_type,
            session_id: None,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            success: true,
            error_code: None,
            metadata: Map::new(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Mark the event as failed with the error's code.
    pub fn failed(mut self, error: &AuthError) -> Self {
        self.success = false;
        self.error_code = Some(error.code().to_string());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A security-relevant decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: String,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub description: String,
    pub metadata: Map<String, Value>,
    /// Unix seconds
    pub timestamp: i64,
}

impl SecurityEvent {
    pub fn new(
        event_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        client: &ClientInfo,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            severity,
            user_id: None,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            description: description.into(),
            metadata: Map::new(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn log_auth_event(&self, event: &AuthEvent) -> AuthResult<()>;

    fn log_security_event(&self, event: &SecurityEvent) -> AuthResult<()>;
}

/// Writes audit events as `tracing` events under the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_auth_event(&self, event: &AuthEvent) -> AuthResult<()> {
        let metadata = Value::Object(event.metadata.clone()).to_string();
        if event.success {
            tracing::info!(
                target: "audit",
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                user_id = %event.user_id,
                session_id = event.session_id.as_deref().unwrap_or(""),
                ip_address = %event.ip_address,
                user_agent = %event.user_agent,
                metadata = %metadata,
                "auth event"
            );
        } else {
            tracing::warn!(
                target: "audit",
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                user_id = %event.user_id,
                session_id = event.session_id.as_deref().unwrap_or(""),
                ip_address = %event.ip_address,
                user_agent = %event.user_agent,
                error_code = event.error_code.as_deref().unwrap_or(""),
                metadata = %metadata,
                "auth event failed"
            );
        }
        Ok(())
    }

    fn log_security_event(&self, event: &SecurityEvent) -> AuthResult<()> {
        let metadata = Value::Object(event.metadata.clone()).to_string();
        match event.severity {
            Severity::Low | Severity::Medium => tracing::warn!(
                target: "audit",
                event_id = %event.id,
                event_type = %event.event_type,
                severity = event.severity.as_str(),
                user_id = event.user_id.as_deref().unwrap_or(""),
                ip_address = %event.ip_address,
                metadata = %metadata,
                "{}",
                event.description
            ),
            Severity::High | Severity::Critical => tracing::error!(
                target: "audit",
                event_id = %event.id,
                event_type = %event.event_type,
                severity = event.severity.as_str(),
                user_id = event.user_id.as_deref().unwrap_or(""),
                ip_address = %event.ip_address,
                metadata = %metadata,
                "{}",
                event.description
            ),
        }
        Ok(())
    }
}

/// Keeps events in memory. Clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    auth_events: Arc<RwLock<Vec<AuthEvent>>>,
    security_events: Arc<RwLock<Vec<SecurityEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded auth events, oldest first.
    pub fn auth_events(&self) -> Vec<AuthEvent> {
        self.auth_events
            .read()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Snapshot of recorded security events, oldest first.
    pub fn security_events(&self) -> Vec<SecurityEvent> {
        self.security_events
            .read()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.auth_events.write() {
            events.clear();
        }
        if let Ok(mut events) = self.security_events.write() {
            events.clear();
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_auth_event(&self, event: &AuthEvent) -> AuthResult<()> {
        self.auth_events
            .write()
            .map_err(|_| AuthError::StorageUnavailable("audit buffer lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    fn log_security_event(&self, event: &SecurityEvent) -> AuthResult<()> {
        self.security_events
            .write()
            .map_err(|_| AuthError::StorageUnavailable("audit buffer lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
