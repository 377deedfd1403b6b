//! In-process session store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Session, SessionStore};
use crate::error::{AuthError, AuthResult};

/// [`SessionStore`] kept in a shared map. Clones share state.
///
/// Refresh-token uniqueness is enforced on create and update, and
/// [`replace_refresh_token`](SessionStore::replace_refresh_token) runs under
/// a single write lock.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AuthResult<RwLockReadGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .read()
            .map_err(|_| AuthError::StorageUnavailable("session store lock poisoned".to_string()))
    }

    fn write(&self) -> AuthResult<RwLockWriteGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .write()
            .map_err(|_| AuthError::StorageUnavailable("session store lock poisoned".to_string()))
    }
}

fn refresh_token_taken(sessions: &HashMap<String, Session>, token: &str, except_id: &str) -> bool {
    sessions
        .values()
        .any(|s| s.refresh_token == token && s.id != except_id)
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: &Session) -> AuthResult<()> {
        let mut sessions = self.write()?;
        if sessions.contains_key(&session.id) {
            return Err(AuthError::StorageUnavailable(format!(
                "session '{}' already exists",
                session.id
            )));
        }
        if refresh_token_taken(&sessions, &session.refresh_token, &session.id) {
            return Err(AuthError::StorageUnavailable(
                "refresh token already in use".to_string(),
            ));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> AuthResult<Option<Session>> {
        Ok(self.read()?.get(id).cloned())
    }

    fn get_by_refresh_token(&self, refresh_token: &str) -> AuthResult<Option<Session>> {
        Ok(self
            .read()?
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned())
    }

    fn get_by_user(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        Ok(self
            .read()?
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn update(&self, session: &Session) -> AuthResult<bool> {
        let mut sessions = self.write()?;
        if !sessions.contains_key(&session.id) {
            return Ok(false);
        }
        if refresh_token_taken(&sessions, &session.refresh_token, &session.id) {
            return Err(AuthError::StorageUnavailable(
                "refresh token already in use".to_string(),
            ));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(true)
    }

    fn replace_refresh_token(
        &self,
        id: &str,
        expected: &str,
        new: &str,
        expires_at: i64,
    ) -> AuthResult<bool> {
        let mut sessions = self.write()?;
        if refresh_token_taken(&sessions, new, id) {
            return Err(AuthError::StorageUnavailable(
                "refresh token already in use".to_string(),
            ));
        }
        match sessions.get_mut(id) {
            Some(session) if session.refresh_token == expected => {
                session.refresh_token = new.to_string();
                session.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, id: &str) -> AuthResult<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    fn delete_by_user(&self, user_id: &str) -> AuthResult<u64> {
        let mut sessions = self.write()?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    fn delete_expired(&self) -> AuthResult<u64> {
        let mut sessions = self.write()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok((before - sessions.len()) as u64)
    }

    fn count_active(&self) -> AuthResult<u64> {
        Ok(self.read()?.values().filter(|s| !s.is_expired()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientInfo;
    use std::time::Duration;

    fn create_test_session(refresh_token: &str) -> Session {
        Session::new(
            "user-1",
            refresh_token,
            Duration::from_secs(3600),
            &ClientInfo::new("127.0.0.1", "tests"),
        )
    }

    #[test]
    fn test_create_and_get() {
        let store = MemorySessionStore::new();
        let session = create_test_session("rt-1");

        store.create(&session).unwrap();
        assert_eq!(store.get(&session.id).unwrap().unwrap(), session);
        assert_eq!(store.get_by_refresh_token("rt-1").unwrap().unwrap().id, session.id);
        assert!(store.get_by_refresh_token("rt-unknown").unwrap().is_none());
    }

    #[test]
    fn test_refresh_token_unique() {
        let store = MemorySessionStore::new();
        store.create(&create_test_session("rt-1")).unwrap();
        assert!(store.create(&create_test_session("rt-1")).is_err());

        let mut other = create_test_session("rt-2");
        store.create(&other).unwrap();
        other.refresh_token = "rt-1".to_string();
        assert!(store.update(&other).is_err());
    }

    #[test]
    fn test_replace_refresh_token() {
        let store = MemorySessionStore::new();
        let session = create_test_session("rt-1");
        store.create(&session).unwrap();

        assert!(store.replace_refresh_token(&session.id, "rt-1", "rt-2", 99).unwrap());
        assert!(!store.replace_refresh_token(&session.id, "rt-1", "rt-3", 99).unwrap());
        assert!(!store.replace_refresh_token("sess_missing", "rt-2", "rt-3", 99).unwrap());

        let stored = store.get(&session.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token, "rt-2");
        assert_eq!(stored.expires_at, 99);
    }

    #[test]
    fn test_delete_by_user() {
        let store = MemorySessionStore::new();
        store.create(&create_test_session("a")).unwrap();
        store.create(&create_test_session("b")).unwrap();
        let mut other = create_test_session("c");
        other.user_id = "user-2".to_string();
        store.create(&other).unwrap();

        assert_eq!(store.delete_by_user("user-1").unwrap(), 2);
        assert_eq!(store.get_by_user("user-1").unwrap().len(), 0);
        assert_eq!(store.get_by_user("user-2").unwrap().len(), 1);
        assert!(store.delete(&other.id).unwrap());
        assert!(!store.delete(&other.id).unwrap());
    }

    #[test]
    fn test_update_missing() {
        let store = MemorySessionStore::new();
        assert!(!store.update(&create_test_session("x")).unwrap());
    }
}
