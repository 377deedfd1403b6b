//! Login flow example
//!
//! Walks through login, token validation, refresh rotation, lockout and
//! logout against in-memory backends. Audit events are printed by the
//! tracing subscriber under the `audit` target.
//!
//! Run with: RUST_LOG=info cargo run --example login_flow

use std::sync::Arc;

use gatekeep::credentials::{hash_password, LockoutConfig};
use gatekeep::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Users normally live in the service's own database
    let users = MemoryUserStore::new();
    users.insert(User {
        id: "user-1".to_string(),
        email: "jane@example.com".to_string(),
        password_hash: hash_password("correct horse battery", 10)?,
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        role: Role::Applicant.as_str().to_string(),
        status: AccountStatus::Active,
        created_at: chrono::Utc::now().timestamp(),
        last_login_at: None,
    })?;

    let config = AuthConfig::default().with_lockout(LockoutConfig::default().with_max_attempts(3));
    let service = AuthService::new(
        config,
        b"example-signing-secret-change-me-in-production",
        Arc::new(users),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryCache::new()),
        Arc::new(TracingAuditSink),
    )?;
    let client = ClientInfo::new("203.0.113.7", "loan-portal/2.1");

    println!("=== Login Flow Example ===\n");

    println!("1. Login");
    let tokens = service.login("jane@example.com", "correct horse battery", &client)?;
    println!("   [OK] Logged in as {}", tokens.user.email);
    println!("      Session:    {}", tokens.session_id);
    println!("      Expires in: {} seconds", tokens.expires_in);

    println!();
    println!("2. Authenticated Request");
    let ctx = service.validate_access_token(&tokens.access_token)?;
    println!("   [OK] Token valid for {} ({})", ctx.user_id, ctx.role);
    for permission in [Permission::SubmitApplication, Permission::ManageUsers] {
        match service.authorize(&ctx, permission) {
            Ok(()) => println!("   [OK] {} allowed", permission),
            Err(e) => println!("   [DENIED] {}: {}", permission, e),
        }
    }

    println!();
    println!("3. Refresh");
    let refreshed = service.refresh_token(&tokens.refresh_token, &client)?;
    println!("   [OK] New tokens issued, refresh token rotated");
    match service.refresh_token(&tokens.refresh_token, &client) {
        Ok(_) => println!("   [UNEXPECTED] Old refresh token still works"),
        Err(e) => println!("   [OK] Old refresh token rejected: {} ({})", e, e.code()),
    }

    println!();
    println!("4. Revocation");
    service.revoke_access_token(&refreshed.access_token)?;
    match service.validate_access_token(&refreshed.access_token) {
        Ok(_) => println!("   [UNEXPECTED] Revoked token accepted"),
        Err(e) => println!("   [OK] Revoked token rejected: {}", e),
    }

    println!();
    println!("5. Brute Force");
    for attempt in 1..=4 {
        match service.login("jane@example.com", "guess-number-one", &client) {
            Ok(_) => println!("   attempt {}: [UNEXPECTED] accepted", attempt),
            Err(e) => println!(
                "   attempt {}: {} (HTTP {})",
                attempt,
                e,
                e.http_status_code()
            ),
        }
    }

    println!();
    println!("6. Logout");
    service.logout(&ctx.user_id, &ctx.session_id, &client)?;
    println!("   [OK] Session ended");
    let remaining = service.user_sessions(&ctx.user_id)?;
    println!("   Remaining sessions: {}", remaining.len());

    println!();
    println!("=== Example Complete ===");

    Ok(())
}
