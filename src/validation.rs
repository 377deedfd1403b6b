//! Input validation for credentials, refresh tokens and signing key ids.
//!
//! These checks run before any store or cache is touched, so oversized or
//! malformed input never reaches bcrypt or the database.

use crate::error::{AuthError, AuthResult};
use crate::{
    MAX_EMAIL_LENGTH, MAX_KEY_ID_LENGTH, MAX_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH,
    REFRESH_TOKEN_LENGTH,
};

/// Validate an email address.
///
/// Emails must:
/// - Be at most 254 characters
/// - Contain exactly one `@` with a non-empty local part
/// - Have a domain containing a dot, with no empty labels
/// - Contain no whitespace or control characters
///
/// # Examples
///
/// ```rust
/// use gatekeep::validate_email;
///
/// assert!(validate_email("jane@example.com").is_ok());
/// assert!(validate_email("jane.doe+loans@mail.example.org").is_ok());
///
/// assert!(validate_email("not-an-email").is_err());
/// assert!(validate_email("").is_err());
/// ```
pub fn validate_email(email: &str) -> AuthResult<()> {
    if email.is_empty() {
        return Err(AuthError::InvalidRequest("Email cannot be empty".to_string()));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(AuthError::InvalidRequest(format!(
            "Email exceeds maximum length of {} characters",
            MAX_EMAIL_LENGTH
        )));
    }

    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthError::InvalidRequest(
            "Email contains invalid characters".to_string(),
        ));
    }

    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => {
            return Err(AuthError::InvalidRequest(
                "Email must contain '@'".to_string(),
            ))
        }
    };

    if local.is_empty() {
        return Err(AuthError::InvalidRequest(
            "Email local part cannot be empty".to_string(),
        ));
    }

    if domain.contains('@') {
        return Err(AuthError::InvalidRequest(
            "Email must contain a single '@'".to_string(),
        ));
    }

    if !domain.contains('.') || domain.split('.').any(|label| label.is_empty()) {
        return Err(AuthError::InvalidRequest(
            "Email domain is invalid".to_string(),
        ));
    }

    Ok(())
}

/// Validate a password's length.
///
/// bcrypt only looks at the first 72 bytes, so anything longer is rejected
/// rather than silently truncated.
pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::InvalidRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::InvalidRequest(format!(
            "Password exceeds maximum length of {} bytes",
            MAX_PASSWORD_LENGTH
        )));
    }

    Ok(())
}

/// Validate the shape of a refresh token (unpadded URL-safe base64 of 32
/// random bytes).
pub fn validate_refresh_token(token: &str) -> AuthResult<()> {
    if token.len() != REFRESH_TOKEN_LENGTH {
        return Err(AuthError::InvalidRefreshToken);
    }

    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AuthError::InvalidRefreshToken);
    }

    Ok(())
}

/// Validate a signing key identifier.
///
/// Key ids should be:
/// - Non-empty
/// - Maximum 128 characters
/// - Alphanumeric with `-`, `_`, `.` and `:`
pub fn validate_key_id(key_id: &str) -> AuthResult<()> {
    if key_id.is_empty() {
        return Err(AuthError::InvalidRequest(
            "Key id cannot be empty".to_string(),
        ));
    }

    if key_id.len() > MAX_KEY_ID_LENGTH {
        return Err(AuthError::InvalidRequest(format!(
            "Key id exceeds maximum length of {} characters",
            MAX_KEY_ID_LENGTH
        )));
    }

    if !key_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(AuthError::InvalidRequest(
            "Key id contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
