//! Signed request example
//!
//! Shows a caller signing a machine-to-machine request and the receiving
//! service verifying it, including the common rejection cases.
//!
//! Run with: cargo run --example signed_request

use std::sync::Arc;

use gatekeep::signature::{http_date, HttpSignatureVerifier, SignatureConfig};
use gatekeep::{HttpSignatureSigner, SignedRequest};
use gatekeep::prelude::StaticKeyStore;

const SHARED_KEY: &[u8] = b"decision-engine-shared-secret";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let keys = StaticKeyStore::new().with_key("decision-engine", SHARED_KEY);
    let verifier = HttpSignatureVerifier::new(Arc::new(keys), SignatureConfig::default());

    let signer = HttpSignatureSigner::new("decision-engine", SHARED_KEY)
        .with_headers(["request-line", "date", "content-length", "digest"]);

    let date = http_date(chrono::Utc::now());
    let body = br#"{"application_id":"app-7","decision":"approved"}"#;
    let header = signer.sign("POST", "/internal/decisions", &date, body)?;

    println!("Date:      {}", date);
    println!("Signature: {}", header);
    println!();

    let request = SignedRequest::new("POST", "/internal/decisions")
        .with_date(&date)
        .with_signature(&header)
        .with_body(body);

    match verifier.verify(&request) {
        Ok(key_id) => println!("[OK] Signed by {}", key_id),
        Err(e) => println!("[FAIL] {}", e),
    }

    println!();
    println!("--- Testing Error Cases ---");

    // Body changed in transit
    let tampered = request.with_body(br#"{"application_id":"app-7","decision":"declined"}"#);
    report("Tampered body", verifier.verify(&tampered));

    // Replayed ten minutes later
    let later = chrono::Utc::now() + chrono::Duration::minutes(10);
    report("Replay after 10 minutes", verifier.verify_at(&request, later));

    // No signature at all
    let unsigned = SignedRequest::new("POST", "/internal/decisions").with_date(&date);
    report("Unsigned request", verifier.verify(&unsigned));

    // Key the receiver does not know
    let stranger = HttpSignatureSigner::new("unknown-service", b"other".to_vec())
        .sign("GET", "/internal/health", &date, b"")?;
    let foreign = SignedRequest::new("GET", "/internal/health")
        .with_date(&date)
        .with_signature(&stranger);
    report("Unknown key", verifier.verify(&foreign));

    Ok(())
}

fn report(case: &str, result: gatekeep::AuthResult<String>) {
    match result {
        Ok(key_id) => println!("[UNEXPECTED] {}: accepted for {}", case, key_id),
        Err(e) => println!(
            "[OK] {}: {} ({}, HTTP {})",
            case,
            e,
            e.code(),
            e.http_status_code()
        ),
    }
}
