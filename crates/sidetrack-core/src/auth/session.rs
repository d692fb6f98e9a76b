use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::{MemoryStore, SessionStore};
use crate::models::User;

/// Persisted session record.
///
/// There is no stored "authenticated" flag; it is always derived from
/// `token`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub token: Option<String>,
    pub user: Option<User>,
    /// `Cookie` header for the API origin, so the refresh cookie survives a
    /// restart.
    pub cookies: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

/// Process-wide session handle. Clones share the same state.
///
/// Every mutation is written through to the store. A failed write is logged
/// and the in-memory state still changes, so a broken disk never blocks a
/// login or a refresh.
#[derive(Clone)]
pub struct Session {
    data: Arc<RwLock<SessionData>>,
    store: Arc<dyn SessionStore>,
}

impl Session {
    /// Empty session backed by `store`. Nothing is read from the store.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            data: Arc::new(RwLock::new(SessionData::default())),
            store,
        }
    }

    /// Session that lives only in this process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    /// Rehydrate from `store`. Returns whether a token was restored.
    pub fn load(&self) -> Result<bool> {
        let restored = self.store.load()?.unwrap_or_default();
        let authenticated = restored.is_authenticated();
        *self.write() = restored;
        debug!(authenticated, "Session loaded");
        Ok(authenticated)
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut SessionData)) {
        let snapshot = {
            let mut data = self.write();
            change(&mut data);
            data.updated_at = Some(Utc::now());
            data.clone()
        };
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "Failed to save session");
        }
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    pub fn cookies(&self) -> Option<String> {
        self.read().cookies.clone()
    }

    pub fn snapshot(&self) -> SessionData {
        self.read().clone()
    }

    pub fn set_token(&self, token: String) {
        self.update(|data| data.token = Some(token));
    }

    /// Store a refreshed token together with the cookies that came with it.
    pub fn set_refreshed(&self, token: String, cookies: Option<String>) {
        self.update(|data| {
            data.token = Some(token);
            if cookies.is_some() {
                data.cookies = cookies;
            }
        });
    }

    /// Populate the session after a login or registration.
    pub fn establish(&self, token: String, user: User, cookies: Option<String>) {
        self.update(|data| {
            data.token = Some(token);
            data.user = Some(user);
            data.cookies = cookies;
        });
    }

    pub fn set_user(&self, user: User) {
        self.update(|data| data.user = Some(user));
    }

    /// Forget everything, in memory and in the store.
    pub fn clear(&self) {
        *self.write() = SessionData::default();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        debug!("Session cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            github_username: None,
            has_github_token: false,
            avatar_url: None,
            created_at: None,
        }
    }

    #[test]
    fn test_authenticated_tracks_token() {
        let session = Session::in_memory();
        assert!(!session.is_authenticated());

        session.set_token("t".to_string());
        assert!(session.is_authenticated());
        assert_eq!(session.token().as_deref(), Some("t"));

        session.clear();
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());
        assert!(session.user().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let session = Session::in_memory();
        let other = session.clone();
        session.set_token("shared".to_string());
        assert_eq!(other.token().as_deref(), Some("shared"));
    }

    #[test]
    fn test_rehydrate_recomputes_authenticated() {
        let store = Arc::new(MemoryStore::default());
        let first = Session::new(store.clone());
        first.establish("tok1".to_string(), user(), Some("refresh_token=r".to_string()));

        let second = Session::new(store.clone());
        assert!(!second.is_authenticated());
        assert!(second.load().unwrap());
        assert!(second.is_authenticated());
        assert_eq!(second.user().map(|u| u.id), Some("u1".to_string()));
        assert_eq!(second.cookies().as_deref(), Some("refresh_token=r"));

        // A stored profile without a token is not a login
        store
            .save(&SessionData {
                user: Some(user()),
                ..Default::default()
            })
            .unwrap();
        let third = Session::new(store);
        assert!(!third.load().unwrap());
        assert!(!third.is_authenticated());
    }

    #[test]
    fn test_clear_wipes_store() {
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(store.clone());
        session.set_token("t".to_string());
        assert!(store.load().unwrap().is_some());
        session.clear();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_refresh_keeps_cookies_when_none_reported() {
        let session = Session::in_memory();
        session.establish("t1".to_string(), user(), Some("refresh_token=r1".to_string()));
        session.set_refreshed("t2".to_string(), None);
        assert_eq!(session.token().as_deref(), Some("t2"));
        assert_eq!(session.cookies().as_deref(), Some("refresh_token=r1"));
        assert!(session.user().is_some());
    }
}
