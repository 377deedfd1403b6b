//! SQLite session store implementation.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

use super::{Session, SessionStore};
use crate::error::{AuthError, AuthResult};

const SESSION_COLUMNS: &str =
    "id, user_id, refresh_token, expires_at, created_at, ip_address, user_agent";

/// SQLite-backed session store.
///
/// # Example
///
/// ```rust,ignore
/// use gatekeep::session::SqliteSessionStore;
///
/// // In-memory database
/// let store = SqliteSessionStore::in_memory()?;
///
/// // File-based database
/// let store = SqliteSessionStore::new("sessions.db")?;
/// ```
pub struct SqliteSessionStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSessionStore {
    /// Create a new SQLite session store with the given database path.
    pub fn new(path: &str) -> AuthResult<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager)?;
        Self::from_pool(pool)
    }

    /// Create an in-memory SQLite session store.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// capped at a single connection.
    pub fn in_memory() -> AuthResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    /// Create from an existing r2d2 pool.
    pub fn from_pool(pool: Pool<SqliteConnectionManager>) -> AuthResult<Self> {
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> AuthResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                refresh_token TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                ip_address TEXT NOT NULL DEFAULT '',
                user_agent TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
            "#,
        )?;
        Ok(())
    }

    /// Get a connection from the pool.
    fn conn(&self) -> AuthResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AuthError::StorageUnavailable(e.to_string()))
    }

    fn query_one(&self, filter: &str, value: &str) -> AuthResult<Option<Session>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM sessions WHERE {} = ?1", SESSION_COLUMNS, filter);
        let session = conn
            .query_row(&sql, params![value], session_from_row)
            .optional()?;
        Ok(session)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        refresh_token: row.get(2)?,
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
        ip_address: row.get(5)?,
        user_agent: row.get(6)?,
    })
}

impl SessionStore for SqliteSessionStore {
    fn create(&self, session: &Session) -> AuthResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token, expires_at, created_at, ip_address, user_agent)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session.id,
                session.user_id,
                session.refresh_token,
                session.expires_at,
                session.created_at,
                session.ip_address,
                session.user_agent,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> AuthResult<Option<Session>> {
        self.query_one("id", id)
    }

    fn get_by_refresh_token(&self, refresh_token: &str) -> AuthResult<Option<Session>> {
        self.query_one("refresh_token", refresh_token)
    }

    fn get_by_user(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE user_id = ?1 ORDER BY created_at",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![user_id], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn update(&self, session: &Session) -> AuthResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r#"
            UPDATE sessions SET
                user_id = ?2,
                refresh_token = ?3,
                expires_at = ?4,
                ip_address = ?5,
                user_agent = ?6
            WHERE id = ?1
            "#,
            params![
                session.id,
                session.user_id,
                session.refresh_token,
                session.expires_at,
                session.ip_address,
                session.user_agent,
            ],
        )?;
        Ok(rows > 0)
    }

    fn replace_refresh_token(
        &self,
        id: &str,
        expected: &str,
        new: &str,
        expires_at: i64,
    ) -> AuthResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE sessions SET refresh_token = ?1, expires_at = ?2 WHERE id = ?3 AND refresh_token = ?4",
            params![new, expires_at, id, expected],
        )?;
        Ok(rows > 0)
    }

    fn delete(&self, id: &str) -> AuthResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_by_user(&self, user_id: &str) -> AuthResult<u64> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        Ok(rows as u64)
    }

    fn delete_expired(&self) -> AuthResult<u64> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
        Ok(rows as u64)
    }

    fn count_active(&self) -> AuthResult<u64> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE expires_at > ?1",
            params![now],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientInfo;
    use std::time::Duration;

    fn create_test_session(refresh_token: &str) -> Session {
        Session::new(
            "user-42",
            refresh_token,
            Duration::from_secs(3600),
            &ClientInfo::new("198.51.100.1", "sqlite-tests"),
        )
    }

    #[test]
    fn test_create_and_get() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = create_test_session("rt-1");

        store.create(&session).unwrap();
        let retrieved = store.get(&session.id).unwrap().unwrap();
        assert_eq!(retrieved, session);

        let by_token = store.get_by_refresh_token("rt-1").unwrap().unwrap();
        assert_eq!(by_token.id, session.id);
        assert!(store.get("sess_missing").unwrap().is_none());
    }

    #[test]
    fn test_refresh_token_unique() {
        let store = SqliteSessionStore::in_memory().unwrap();
        store.create(&create_test_session("dup")).unwrap();

        let err = store.create(&create_test_session("dup")).unwrap_err();
        assert!(matches!(err, AuthError::StorageUnavailable(_)));
    }

    #[test]
    fn test_replace_refresh_token() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = create_test_session("rt-1");
        store.create(&session).unwrap();

        let new_expiry = session.expires_at + 60;
        assert!(store
            .replace_refresh_token(&session.id, "rt-1", "rt-2", new_expiry)
            .unwrap());
        assert!(!store
            .replace_refresh_token(&session.id, "rt-1", "rt-3", new_expiry)
            .unwrap());

        let updated = store.get(&session.id).unwrap().unwrap();
        assert_eq!(updated.refresh_token, "rt-2");
        assert_eq!(updated.expires_at, new_expiry);
        assert!(store.get_by_refresh_token("rt-1").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_delete_by_user() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let first = create_test_session("a");
        store.create(&first).unwrap();
        store.create(&create_test_session("b")).unwrap();

        assert_eq!(store.get_by_user("user-42").unwrap().len(), 2);
        assert!(store.delete(&first.id).unwrap());
        assert!(!store.delete(&first.id).unwrap());
        assert_eq!(store.delete_by_user("user-42").unwrap(), 1);
        assert!(store.get_by_user("user-42").unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let now = chrono::Utc::now().timestamp();

        let mut expired = create_test_session("expired");
        expired.expires_at = now - 100;
        store.create(&expired).unwrap();

        let valid = create_test_session("valid");
        store.create(&valid).unwrap();

        assert_eq!(store.count_active().unwrap(), 1);
        assert_eq!(store.delete_expired().unwrap(), 1);

        assert!(store.get(&expired.id).unwrap().is_none());
        assert!(store.get(&valid.id).unwrap().is_some());
    }
}
