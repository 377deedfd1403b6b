//! HTTP request signatures for machine-to-machine calls.
//!
//! A caller signs a canonical rendering of the request with a pre-shared key
//! and sends the result in a `Signature` header:
//!
//! ```text
//! keyId="billing",algorithm="hmac-sha256",headers="request-line date digest",signature="<base64>"
//! ```
//!
//! The canonical string has one line per name in `headers`, in that order:
//!
//! | name             | line                                            |
//! |------------------|-------------------------------------------------|
//! | `request-line`   | `request-line: <METHOD> <PATH> HTTP/1.1`        |
//! | `date`           | `date: <Date header value>`                     |
//! | `content-length` | `content-length: <body length in bytes>`        |
//! | `digest`         | `digest: SHA-256=<base64 SHA-256 of the body>`  |
//!
//! The `digest` line is omitted for an empty body. Lines are joined with
//! `\n` and there is no trailing newline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AuthError, AuthResult};
use crate::validation::validate_key_id;

type HmacSha256 = Hmac<Sha256>;

/// The only supported signature algorithm.
pub const HMAC_SHA256: &str = "hmac-sha256";

/// Date format written by [`http_date`].
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Signature verification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Maximum distance between the request date and now (default: 5 minutes)
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Reject signatures that name headers this verifier cannot rebuild
    /// instead of skipping them (default: false)
    pub strict_headers: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(5 * 60),
            strict_headers: false,
        }
    }
}

impl SignatureConfig {
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn with_strict_headers(mut self, strict: bool) -> Self {
        self.strict_headers = strict;
        self
    }
}

/// Lookup of pre-shared signing keys.
pub trait KeyStore: Send + Sync {
    /// Resolve `key_id` to its secret, `None` if unknown.
    fn resolve(&self, key_id: &str) -> AuthResult<Option<Vec<u8>>>;
}

/// Fixed set of keys held in memory.
#[derive(Clone, Default)]
pub struct StaticKeyStore {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key_id: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        self.insert(key_id, key);
        self
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.keys.insert(key_id.into(), key.into());
    }
}

impl fmt::Debug for StaticKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyStore")
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyStore for StaticKeyStore {
    fn resolve(&self, key_id: &str) -> AuthResult<Option<Vec<u8>>> {
        Ok(self.keys.get(key_id).cloned())
    }
}

/// Parsed `Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    pub key_id: String,
    pub algorithm: String,
    /// Lowercased header names, in signing order
    pub headers: Vec<String>,
    /// Base64 signature as sent
    pub signature: String,
}

impl SignatureParams {
    /// Parse a header of comma-separated `name="value"` pairs.
    ///
    /// `keyId` and `signature` are required. `algorithm` defaults to
    /// `hmac-sha256` and `headers` to `date`. A repeated name keeps its last
    /// value.
    pub fn parse(header: &str) -> AuthResult<Self> {
        let mut params: HashMap<&str, &str> = HashMap::new();

        for pair in header.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let (name, value) = pair.split_once('=').ok_or(AuthError::InvalidSignature)?;
            let value = value.trim();
            let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                &value[1..value.len() - 1]
            } else {
                value
            };
            params.insert(name.trim(), value);
        }

        let key_id = params
            .get("keyId")
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::InvalidSignature)?;
        let signature = params
            .get("signature")
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::InvalidSignature)?;
        let algorithm = params.get("algorithm").copied().unwrap_or(HMAC_SHA256);
        let headers = params.get("headers").copied().unwrap_or("date");

        Ok(Self {
            key_id: key_id.to_string(),
            algorithm: algorithm.to_string(),
            headers: headers
                .split_whitespace()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            signature: signature.to_string(),
        })
    }
}

/// The parts of an inbound request a signature covers.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// `Date` header value
    pub date: Option<&'a str>,
    /// `Signature` header value
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> SignedRequest<'a> {
    pub fn new(method: &'a str, path: &'a str) -> Self {
        Self {
            method,
            path,
            date: None,
            signature: None,
            body: &[],
        }
    }

    pub fn with_date(mut self, date: &'a str) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_signature(mut self, signature: &'a str) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = body;
        self
    }
}

/// Verifies `Signature` headers against keys from a [`KeyStore`].
#[derive(Clone)]
pub struct HttpSignatureVerifier {
    keys: Arc<dyn KeyStore>,
    config: SignatureConfig,
}

impl HttpSignatureVerifier {
    pub fn new(keys: Arc<dyn KeyStore>, config: SignatureConfig) -> Self {
        Self { keys, config }
    }

    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// Verify a request against the current time. Returns the key id the
    /// request was signed with.
    pub fn verify(&self, request: &SignedRequest<'_>) -> AuthResult<String> {
        self.verify_at(request, Utc::now())
    }

    /// Verify a request as of `now`.
    pub fn verify_at(&self, request: &SignedRequest<'_>, now: DateTime<Utc>) -> AuthResult<String> {
        let header = match request.signature {
            Some(h) if !h.trim().is_empty() => h,
            _ => {
                tracing::warn!(method = %request.method, path = %request.path, "Missing signature header");
                return Err(AuthError::MissingSignatureHeader);
            }
        };

        let params = SignatureParams::parse(header).map_err(|e| {
            tracing::warn!(path = %request.path, "Invalid signature header format");
            e
        })?;

        if validate_key_id(&params.key_id).is_err() {
            tracing::warn!(path = %request.path, "Malformed keyId in signature");
            return Err(AuthError::InvalidSignature);
        }

        if params.algorithm != HMAC_SHA256 {
            tracing::warn!(
                key_id = %params.key_id,
                algorithm = %params.algorithm,
                "Unsupported signature algorithm"
            );
            return Err(AuthError::InvalidSignature);
        }

        let date = self.check_clock_skew(request.date, now)?;

        let key = self.keys.resolve(&params.key_id)?.ok_or_else(|| {
            tracing::warn!(key_id = %params.key_id, "Signing key not found");
            AuthError::KeyNotFound(params.key_id.clone())
        })?;

        if self.config.strict_headers {
            if let Some(unknown) = params.headers.iter().find(|h| !is_known_header(h)) {
                tracing::warn!(key_id = %params.key_id, header = %unknown, "Unsupported header in signature");
                return Err(AuthError::InvalidSignature);
            }
        }

        let canonical = canonical_string(
            &params.headers,
            request.method,
            request.path,
            date,
            request.body,
        );

        let provided = STANDARD
            .decode(params.signature.as_bytes())
            .map_err(|_| AuthError::InvalidSignature)?;
        let expected = hmac_sha256(&key, canonical.as_bytes())?;

        if !bool::from(provided.ct_eq(&expected)) {
            tracing::warn!(
                key_id = %params.key_id,
                method = %request.method,
                path = %request.path,
                "Signature verification failed"
            );
            return Err(AuthError::InvalidSignature);
        }

        tracing::debug!(key_id = %params.key_id, "HTTP signature validated");
        Ok(params.key_id)
    }

    fn check_clock_skew<'d>(&self, date: Option<&'d str>, now: DateTime<Utc>) -> AuthResult<&'d str> {
        let raw = match date {
            Some(d) if !d.trim().is_empty() => d,
            _ => {
                return Err(AuthError::ClockSkewExceeded(
                    "Date header is required".to_string(),
                ))
            }
        };

        let request_time = parse_http_date(raw).ok_or_else(|| {
            AuthError::ClockSkewExceeded(format!("unparseable date '{}'", raw))
        })?;

        let drift_ms = (now.timestamp_millis() - request_time.timestamp_millis()).unsigned_abs();
        let tolerance_ms = u64::try_from(self.config.clock_skew.as_millis()).unwrap_or(u64::MAX);
        if drift_ms >= tolerance_ms {
            tracing::warn!(drift_ms, tolerance_ms, "Request date outside clock skew tolerance");
            return Err(AuthError::ClockSkewExceeded(format!(
                "request time is {}s from server time",
                drift_ms / 1000
            )));
        }

        Ok(raw)
    }
}

/// Produces `Signature` header values for outbound requests.
#[derive(Clone)]
pub struct HttpSignatureSigner {
    key_id: String,
    key: Vec<u8>,
    headers: Vec<String>,
}

impl HttpSignatureSigner {
    /// Signer covering only the `date` header.
    pub fn new(key_id: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            key: key.into(),
            headers: vec!["date".to_string()],
        }
    }

    /// Set which headers are covered, in order.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers = headers
            .into_iter()
            .map(|h| h.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    /// Build the `Signature` header for a request.
    pub fn sign(&self, method: &str, path: &str, date: &str, body: &[u8]) -> AuthResult<String> {
        let canonical = canonical_string(&self.headers, method, path, date, body);
        let mac = hmac_sha256(&self.key, canonical.as_bytes())?;

        Ok(format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            HMAC_SHA256,
            self.headers.join(" "),
            STANDARD.encode(mac)
        ))
    }
}

impl fmt::Debug for HttpSignatureSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSignatureSigner")
            .field("key_id", &self.key_id)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Build the canonical signing string. Unknown header names are skipped.
pub fn canonical_string<S: AsRef<str>>(
    headers: &[S],
    method: &str,
    path: &str,
    date: &str,
    body: &[u8],
) -> String {
    let mut lines = Vec::with_capacity(headers.len());

    for header in headers {
        let header = header.as_ref();
        match header {
            "request-line" => lines.push(format!(
                "request-line: {} {} HTTP/1.1",
                method.to_ascii_uppercase(),
                path
            )),
            "date" => lines.push(format!("date: {}", date)),
            "content-length" => lines.push(format!("content-length: {}", body.len())),
            "digest" => {
                if !body.is_empty() {
                    lines.push(format!("digest: SHA-256={}", body_digest(body)));
                }
            }
            other => {
                tracing::debug!(header = %other, "Skipping unknown header in signature");
            }
        }
    }

    lines.join("\n")
}

/// Base64 SHA-256 of a request body.
pub fn body_digest(body: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(body))
}

/// Format a timestamp as an HTTP `Date` value.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an RFC 1123 (`Sun, 06 Nov 1994 08:49:37 GMT`) or RFC 3339 date.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn is_known_header(name: &str) -> bool {
    matches!(name, "request-line" | "date" | "content-length" | "digest")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> AuthResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AuthError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"shared-secret-for-billing-service";

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn verifier(config: SignatureConfig) -> HttpSignatureVerifier {
        HttpSignatureVerifier::new(
            Arc::new(StaticKeyStore::new().with_key("billing", KEY)),
            config,
        )
    }

    fn signer() -> HttpSignatureSigner {
        HttpSignatureSigner::new("billing", KEY).with_headers([
            "request-line",
            "date",
            "content-length",
            "digest",
        ])
    }

    #[test]
    fn test_parse_params() {
        let params = SignatureParams::parse(
            r#"keyId="svc-1", algorithm="hmac-sha256", headers="Request-Line Date", signature="abc=""#,
        )
        .unwrap();

        assert_eq!(params.key_id, "svc-1");
        assert_eq!(params.headers, vec!["request-line", "date"]);
        assert_eq!(params.signature, "abc=");
    }

    #[test]
    fn test_parse_defaults() {
        let params = SignatureParams::parse(r#"keyId="k",signature="c2ln""#).unwrap();
        assert_eq!(params.algorithm, HMAC_SHA256);
        assert_eq!(params.headers, vec!["date"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SignatureParams::parse(r#"keyId="k",garbage,signature="x""#).is_err());
        assert!(SignatureParams::parse(r#"signature="x""#).is_err());
        assert!(SignatureParams::parse(r#"keyId="k""#).is_err());
    }

    #[test]
    fn test_canonical_string() {
        let headers = ["request-line", "date", "content-length", "digest"];
        let canonical = canonical_string(
            &headers,
            "post",
            "/api/v1/loans",
            "Fri, 01 Mar 2024 12:00:00 GMT",
            b"{}",
        );

        let expected = format!(
            "request-line: POST /api/v1/loans HTTP/1.1\n\
             date: Fri, 01 Mar 2024 12:00:00 GMT\n\
             content-length: 2\n\
             digest: SHA-256={}",
            body_digest(b"{}")
        );
        assert_eq!(canonical, expected);
    }

    #[test]
    fn test_canonical_string_empty_body_omits_digest() {
        let canonical = canonical_string(&["date", "digest"], "GET", "/", "d", b"");
        assert_eq!(canonical, "date: d");
    }

    #[test]
    fn test_sign_and_verify() {
        let date = http_date(now());
        let body = br#"{"amount":1000}"#;
        let header = signer().sign("POST", "/api/v1/loans", &date, body).unwrap();

        let request = SignedRequest::new("POST", "/api/v1/loans")
            .with_date(&date)
            .with_signature(&header)
            .with_body(body);

        let key_id = verifier(SignatureConfig::default())
            .verify_at(&request, now())
            .unwrap();
        assert_eq!(key_id, "billing");
    }

    #[test]
    fn test_signature_deterministic() {
        let date = http_date(now());
        let a = signer().sign("PUT", "/x", &date, b"body").unwrap();
        let b = signer().sign("PUT", "/x", &date, b"body").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_body_tamper_detected() {
        let date = http_date(now());
        let header = signer().sign("POST", "/api", &date, b"amount=1000").unwrap();

        let request = SignedRequest::new("POST", "/api")
            .with_date(&date)
            .with_signature(&header)
            .with_body(b"amount=9000");

        assert!(matches!(
            verifier(SignatureConfig::default()).verify_at(&request, now()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_clock_skew_boundary() {
        let v = verifier(SignatureConfig::default());
        let date = http_date(now());
        let header = signer().sign("GET", "/", &date, b"").unwrap();
        let request = SignedRequest::new("GET", "/")
            .with_date(&date)
            .with_signature(&header);

        let just_inside = now() + chrono::Duration::seconds(299);
        assert!(v.verify_at(&request, just_inside).is_ok());

        let at_limit = now() + chrono::Duration::seconds(300);
        assert!(matches!(
            v.verify_at(&request, at_limit),
            Err(AuthError::ClockSkewExceeded(_))
        ));

        let behind = now() - chrono::Duration::seconds(301);
        assert!(matches!(
            v.verify_at(&request, behind),
            Err(AuthError::ClockSkewExceeded(_))
        ));
    }

    #[test]
    fn test_missing_or_bad_date() {
        let v = verifier(SignatureConfig::default());
        let header = signer().sign("GET", "/", "whenever", b"").unwrap();

        let no_date = SignedRequest::new("GET", "/").with_signature(&header);
        assert!(matches!(
            v.verify_at(&no_date, now()),
            Err(AuthError::ClockSkewExceeded(_))
        ));

        let bad_date = no_date.with_date("whenever");
        assert!(matches!(
            v.verify_at(&bad_date, now()),
            Err(AuthError::ClockSkewExceeded(_))
        ));
    }

    #[test]
    fn test_rfc3339_date_accepted() {
        let date = "2024-03-01T12:00:30Z";
        let header = HttpSignatureSigner::new("billing", KEY)
            .sign("GET", "/", date, b"")
            .unwrap();
        let request = SignedRequest::new("GET", "/")
            .with_date(date)
            .with_signature(&header);

        assert!(verifier(SignatureConfig::default())
            .verify_at(&request, now())
            .is_ok());
    }

    #[test]
    fn test_missing_signature_header() {
        let date = http_date(now());
        let request = SignedRequest::new("GET", "/").with_date(&date);
        assert!(matches!(
            verifier(SignatureConfig::default()).verify_at(&request, now()),
            Err(AuthError::MissingSignatureHeader)
        ));
    }

    #[test]
    fn test_unknown_key() {
        let date = http_date(now());
        let header = HttpSignatureSigner::new("payments", KEY)
            .sign("GET", "/", &date, b"")
            .unwrap();
        let request = SignedRequest::new("GET", "/")
            .with_date(&date)
            .with_signature(&header);

        assert!(matches!(
            verifier(SignatureConfig::default()).verify_at(&request, now()),
            Err(AuthError::KeyNotFound(id)) if id == "payments"
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let date = http_date(now());
        let header = signer()
            .sign("GET", "/", &date, b"")
            .unwrap()
            .replace("hmac-sha256", "rsa-sha256");
        let request = SignedRequest::new("GET", "/")
            .with_date(&date)
            .with_signature(&header);

        assert!(matches!(
            verifier(SignatureConfig::default()).verify_at(&request, now()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_algorithm_name_is_case_sensitive() {
        let date = http_date(now());
        let header = signer()
            .sign("GET", "/", &date, b"")
            .unwrap()
            .replace("hmac-sha256", "HMAC-SHA256");
        let request = SignedRequest::new("GET", "/")
            .with_date(&date)
            .with_signature(&header);

        assert!(matches!(
            verifier(SignatureConfig::default()).verify_at(&request, now()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unknown_header_names() {
        let date = http_date(now());
        let header = HttpSignatureSigner::new("billing", KEY)
            .with_headers(["date", "x-tenant"])
            .sign("GET", "/", &date, b"")
            .unwrap();
        let request = SignedRequest::new("GET", "/")
            .with_date(&date)
            .with_signature(&header);

        assert!(verifier(SignatureConfig::default())
            .verify_at(&request, now())
            .is_ok());

        let strict = SignatureConfig::default().with_strict_headers(true);
        assert!(matches!(
            verifier(strict).verify_at(&request, now()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let date = http_date(now());
        let header = HttpSignatureSigner::new("billing", b"some-other-secret".to_vec())
            .sign("GET", "/", &date, b"")
            .unwrap();
        let request = SignedRequest::new("GET", "/")
            .with_date(&date)
            .with_signature(&header);

        assert!(matches!(
            verifier(SignatureConfig::default()).verify_at(&request, now()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_http_date_round_trip() {
        let formatted = http_date(now());
        assert_eq!(formatted, "Fri, 01 Mar 2024 12:00:00 GMT");
        assert_eq!(parse_http_date(&formatted), Some(now()));
    }
}
