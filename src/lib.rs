//! # Gatekeep - Authentication & Session Integrity
//!
//! Credential verification, brute-force lockout, access/refresh token
//! lifecycle with revocation, rate limiting and HTTP request signatures for
//! a multi-service backend.
//!
//! ## Features
//!
//! - **Login**: bcrypt password verification with per-account lockout after
//!   repeated failures
//! - **Tokens**: short-lived HS256 access tokens with revocation, opaque
//!   refresh tokens rotated on every use
//! - **Sessions**: trait-based session storage with in-memory and SQLite
//!   backends
//! - **Rate Limiting**: fixed-window counters in a shared cache
//! - **HTTP Signatures**: HMAC-SHA256 signed machine-to-machine requests with
//!   a clock-skew window
//! - **Audit**: every authentication outcome reported to an [`AuditSink`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use gatekeep::credentials::hash_password;
//! use gatekeep::prelude::*;
//!
//! # fn main() -> Result<(), AuthError> {
//! let users = MemoryUserStore::new();
//! users.insert(User {
//!     id: "user-1".into(),
//!     email: "jane@example.com".into(),
//!     password_hash: hash_password("correct horse battery", 4)?,
//!     first_name: "Jane".into(),
//!     last_name: "Doe".into(),
//!     role: "applicant".into(),
//!     status: AccountStatus::Active,
//!     created_at: 0,
//!     last_login_at: None,
//! })?;
//!
//! let service = AuthService::new(
//!     AuthConfig::default(),
//!     b"an-hmac-secret-of-at-least-32-bytes!",
//!     Arc::new(users),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(TracingAuditSink),
//! )?;
//!
//! let client = ClientInfo::new("203.0.113.7", "loan-portal/2.1");
//! let tokens = service.login("jane@example.com", "correct horse battery", &client)?;
//!
//! let ctx = service.validate_access_token(&tokens.access_token)?;
//! assert_eq!(ctx.user_id, "user-1");
//! service.authorize(&ctx, Permission::SubmitApplication)?;
//!
//! let rotated = service.refresh_token(&tokens.refresh_token, &client)?;
//! assert_ne!(rotated.refresh_token, tokens.refresh_token);
//! # Ok(())
//! # }
//! ```
//!
//! ## With SQLite Sessions
//!
//! ```rust,ignore
//! use gatekeep::session::SqliteSessionStore;
//!
//! let sessions = Arc::new(SqliteSessionStore::new("sessions.db")?);
//! let service = AuthService::new(config, secret, users, sessions, cache, audit)?;
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod signature;
pub mod token;
pub mod user;
pub mod validation;

// Re-exports for convenience
pub use audit::{AuditSink, AuthEvent, AuthEventType, SecurityEvent, Severity};
pub use cache::{CounterCache, MemoryCache};
pub use config::{AuthConfig, FailMode, FailurePolicy};
pub use error::{AuthError, AuthResult};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use service::{AuthContext, AuthService, TokenResponse};
pub use session::{ClientInfo, Session, SessionManager, SessionStore};
pub use signature::{HttpSignatureSigner, HttpSignatureVerifier, KeyStore, SignedRequest};
pub use token::{AccessClaims, TokenManager};
pub use user::{Permission, Role, User, UserStore};
pub use validation::{validate_email, validate_key_id, validate_password, validate_refresh_token};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum access token length (prevents DoS via large tokens)
pub const MAX_TOKEN_LENGTH: usize = 4096;

/// Minimum secret key length (32 bytes = 256 bits for HMAC-SHA256 security)
pub const MIN_SECRET_LENGTH: usize = 32;

/// Length of an encoded refresh token (32 random bytes, unpadded base64url)
pub const REFRESH_TOKEN_LENGTH: usize = 43;

/// Maximum email length
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length in bytes (bcrypt ignores anything beyond)
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// Maximum signing key id length
pub const MAX_KEY_ID_LENGTH: usize = 128;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::audit::{AuditSink, MemoryAuditSink, SecurityEvent, Severity, TracingAuditSink};
    pub use crate::cache::{CounterCache, MemoryCache};
    pub use crate::config::{AuthConfig, FailMode, FailurePolicy};
    pub use crate::error::{AuthError, AuthResult};
    pub use crate::service::{AuthContext, AuthService, TokenResponse};
    pub use crate::session::{ClientInfo, MemorySessionStore, Session, SessionStore};
    pub use crate::signature::{HttpSignatureSigner, KeyStore, SignedRequest, StaticKeyStore};
    pub use crate::user::{AccountStatus, MemoryUserStore, Permission, Role, User, UserStore};

    #[cfg(feature = "session-sqlite")]
    pub use crate::session::SqliteSessionStore;
}
