//! Session management for authenticated users.
//!
//! A session is the server-side record behind a refresh token. Storage is
//! trait-based so it can live in memory, SQLite or any other backend.

mod memory;
mod store;

#[cfg(feature = "session-sqlite")]
mod sqlite;

pub use memory::MemorySessionStore;
pub use store::{ClientInfo, Session, SessionManager, SessionStore};

#[cfg(feature = "session-sqlite")]
pub use sqlite::SqliteSessionStore;
