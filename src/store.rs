// Session store
// Holds the current session; no logic beyond atomic get/set/clear

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::session::{Session, User};

/// Thread-safe holder for the current session.
///
/// The store is the only place the session is mutated from two call sites
/// (foreground operations and the background refresh timer). Reads return a
/// full snapshot clone so callers never observe a torn session between the
/// access token and the expiry fields.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current session wholesale
    pub async fn set(&self, session: Session) {
        let mut guard = self.inner.write().await;
        *guard = Some(session);
    }

    /// Snapshot of the current session, if any
    pub async fn get(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    /// The user carried by the current session, if any
    pub async fn current_user(&self) -> Option<User> {
        self.inner.read().await.as_ref().map(|s| s.user.clone())
    }

    /// Drop the current session. Calling this with no session present is a
    /// no-op and never fails.
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session::issued_now("access", "refresh", "bearer", 3600, User::with_id("u1"))
    }

    #[tokio::test]
    async fn test_set_and_get_round_trip() {
        let store = SessionStore::new();
        assert!(store.get().await.is_none());

        let session = sample_session();
        store.set(session.clone()).await;
        assert_eq!(store.get().await, Some(session));
    }

    #[tokio::test]
    async fn test_current_user_derived_from_session() {
        let store = SessionStore::new();
        assert!(store.current_user().await.is_none());

        store.set(sample_session()).await;
        assert_eq!(store.current_user().await.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = SessionStore::new();
        store.set(sample_session()).await;

        store.clear().await;
        assert!(store.get().await.is_none());

        // Second clear is a no-op, not an error
        store.clear().await;
        assert!(store.get().await.is_none());
        assert!(store.current_user().await.is_none());
    }

    #[tokio::test]
    async fn test_set_replaces_previous_session_wholesale() {
        let store = SessionStore::new();
        store.set(sample_session()).await;

        let replacement =
            Session::issued_now("access2", "refresh2", "bearer", 7200, User::with_id("u2"));
        store.set(replacement.clone()).await;

        let current = store.get().await.unwrap();
        assert_eq!(current, replacement);
        assert_eq!(store.current_user().await.unwrap().id, "u2");
    }
}
