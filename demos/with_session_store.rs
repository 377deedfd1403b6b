//! Session store example
//!
//! This example demonstrates the session lifecycle with the SQLite backend:
//! creation, refresh-token rotation, logout and cleanup.
//!
//! Run with: cargo run --example with_session_store --features session-sqlite

use std::sync::Arc;
use std::time::Duration;

use gatekeep::session::{ClientInfo, SessionManager, SqliteSessionStore};
use gatekeep::TokenManager;
use gatekeep::token::TokenConfig;
use gatekeep::MemoryCache;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create an in-memory session store (use a file path for persistence)
    let store = SqliteSessionStore::in_memory()?;
    let sessions = SessionManager::new(Arc::new(store), Duration::from_secs(24 * 3600));

    let tokens = TokenManager::new(
        b"example-signing-secret-change-me-in-production",
        TokenConfig::default(),
        Arc::new(MemoryCache::new()),
    )?;
    let laptop = ClientInfo::new("203.0.113.7", "Firefox/128.0");
    let phone = ClientInfo::new("198.51.100.23", "loan-app-ios/3.4");

    println!("=== Session Management Example ===\n");

    println!("1. Login");
    let session = sessions.create_session("user-1", &tokens.issue_refresh_token()?, &laptop)?;
    println!("   [OK] Session created: {}", session.id);
    println!("      Expires in: {} seconds", session.remaining_seconds());

    println!();
    println!("2. Refresh");
    let current = sessions.validate_refresh_token(&session.refresh_token)?;
    let rotated = sessions.rotate(&current, &tokens.issue_refresh_token()?)?;
    println!("   [OK] Refresh token rotated for {}", rotated.id);
    match sessions.validate_refresh_token(&session.refresh_token) {
        Ok(_) => println!("   [UNEXPECTED] Old refresh token still valid"),
        Err(e) => println!("   [OK] Old refresh token rejected: {}", e),
    }

    println!();
    println!("3. Second Device");
    sessions.create_session("user-1", &tokens.issue_refresh_token()?, &phone)?;
    for s in sessions.user_sessions("user-1")? {
        println!("   {} from {} ({})", s.id, s.ip_address, s.user_agent);
    }

    println!();
    println!("4. Logout (first session)");
    sessions.invalidate(&rotated.id)?;
    println!("   Remaining sessions: {}", sessions.user_sessions("user-1")?.len());

    println!();
    println!("5. Logout All Devices");
    let deleted = sessions.invalidate_all_for_user("user-1")?;
    println!("   [OK] Deleted {} session(s)", deleted);

    println!();
    println!("6. Session Cleanup");
    // In production, run this periodically (e.g., every hour)
    let cleaned = sessions.cleanup()?;
    println!("   Cleaned up {} expired session(s)", cleaned);

    println!();
    println!("=== Example Complete ===");

    Ok(())
}
