// Session persistence
// Adapter contract plus the listener that bridges state transitions to it

use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{AuthError, Result};
use crate::session::Session;
use crate::state::{AuthState, StateChangedListener};

/// Durable storage for the session, supplied by the embedding application.
/// Implementations are arbitrary: file, keychain, in-memory, cookie.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save(&self, session: &Session) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<Option<Session>>;
    async fn destroy(&self) -> anyhow::Result<()>;
}

/// Listener that maps state transitions to persistence-adapter calls.
///
/// | State | Action |
/// |---|---|
/// | SignedIn, UserUpdated, TokenRefreshed | `save(current session)` |
/// | SignedOut, Shutdown | `destroy()` |
/// | ClientLaunch | `load()`, result stashed for [`PersistenceBridge::take_loaded`] |
/// | PasswordRecovery | no-op |
///
/// Saving with no session in the store is a programming error and fails
/// loudly rather than being silently skipped.
pub struct PersistenceBridge {
    adapter: Arc<dyn PersistenceAdapter>,
    loaded: Mutex<Option<Session>>,
}

impl PersistenceBridge {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            adapter,
            loaded: Mutex::new(None),
        }
    }

    /// Take the session loaded by the most recent `ClientLaunch` transition.
    /// The caller decides whether to install it or attempt a refresh.
    pub async fn take_loaded(&self) -> Option<Session> {
        self.loaded.lock().await.take()
    }
}

#[async_trait]
impl StateChangedListener for PersistenceBridge {
    async fn on_state_changed(&self, session: Option<&Session>, state: AuthState) -> Result<()> {
        match state {
            AuthState::SignedIn | AuthState::UserUpdated | AuthState::TokenRefreshed => {
                let session = session.ok_or(AuthError::MissingSession)?;
                self.adapter
                    .save(session)
                    .await
                    .map_err(AuthError::Persistence)
            }
            AuthState::SignedOut | AuthState::Shutdown => self
                .adapter
                .destroy()
                .await
                .map_err(AuthError::Persistence),
            AuthState::ClientLaunch => {
                let loaded = self.adapter.load().await.map_err(AuthError::Persistence)?;
                *self.loaded.lock().await = loaded;
                Ok(())
            }
            AuthState::PasswordRecovery => Ok(()),
        }
    }
}

/// In-memory adapter. Useful for tests and for embedders that opt out of
/// durable persistence.
#[derive(Default)]
pub struct MemoryAdapter {
    slot: Mutex<Option<Session>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    async fn save(&self, session: &Session) -> anyhow::Result<()> {
        *self.slot.lock().await = Some(session.clone());
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<Session>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

/// JSON-file adapter. Writes to a sibling temp file first and renames it
/// into place so a crash mid-write cannot leave a torn session on disk.
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.set_file_name(name);
        path
    }
}

#[async_trait]
impl PersistenceAdapter for FileAdapter {
    async fn save(&self, session: &Session) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(session).context("Failed to serialize session")?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .with_context(|| format!("Failed to write session file: {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to move session file into place: {}", self.path.display()))?;

        tracing::debug!("Session persisted to {}", self.path.display());
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<Session>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read session file: {}", self.path.display())
                })
            }
        };

        let session = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse session file: {}", self.path.display()))?;
        Ok(Some(session))
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("Failed to remove session file: {}", self.path.display())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::User;

    fn sample_session() -> Session {
        Session::issued_now("access", "refresh", "bearer", 3600, User::with_id("u1"))
    }

    #[tokio::test]
    async fn test_memory_adapter_round_trip() {
        let adapter = MemoryAdapter::new();
        let session = sample_session();

        adapter.save(&session).await.unwrap();
        assert_eq!(adapter.load().await.unwrap(), Some(session));

        adapter.destroy().await.unwrap();
        assert!(adapter.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_adapter_round_trip() {
        let path = std::env::temp_dir().join(format!("authkeep-test-{}.json", std::process::id()));
        let adapter = FileAdapter::new(&path);
        let session = sample_session();

        adapter.save(&session).await.unwrap();
        assert_eq!(adapter.load().await.unwrap(), Some(session));

        adapter.destroy().await.unwrap();
        assert!(adapter.load().await.unwrap().is_none());

        // Destroying again with no file present is fine
        adapter.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_adapter_loads_degenerate_lifetime_without_panicking() {
        let path = std::env::temp_dir().join(format!(
            "authkeep-test-degenerate-{}.json",
            std::process::id()
        ));
        // Hand-written file with an out-of-range lifetime; expiry checks on
        // the loaded session must saturate rather than panic
        let json = format!(
            r#"{{"access_token":"at","refresh_token":"rt","token_type":"bearer","expires_in":{},"created_at":"2020-01-01T00:00:00Z","user":{{"id":"u1"}}}}"#,
            i64::MAX
        );
        tokio::fs::write(&path, json).await.unwrap();

        let adapter = FileAdapter::new(&path);
        let session = adapter.load().await.unwrap().unwrap();
        assert_eq!(session.expires_in, i64::MAX);
        assert!(!session.is_expired());

        adapter.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_adapter_load_missing_file_is_none() {
        let path = std::env::temp_dir().join("authkeep-test-does-not-exist.json");
        let adapter = FileAdapter::new(path);
        assert!(adapter.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_saves_on_signed_in() {
        let adapter = Arc::new(MemoryAdapter::new());
        let bridge = PersistenceBridge::new(adapter.clone());
        let session = sample_session();

        bridge
            .on_state_changed(Some(&session), AuthState::SignedIn)
            .await
            .unwrap();
        assert_eq!(adapter.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_bridge_saves_on_refresh_and_user_update() {
        let adapter = Arc::new(MemoryAdapter::new());
        let bridge = PersistenceBridge::new(adapter.clone());
        let session = sample_session();

        bridge
            .on_state_changed(Some(&session), AuthState::TokenRefreshed)
            .await
            .unwrap();
        assert!(adapter.load().await.unwrap().is_some());

        adapter.destroy().await.unwrap();
        bridge
            .on_state_changed(Some(&session), AuthState::UserUpdated)
            .await
            .unwrap();
        assert!(adapter.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bridge_save_without_session_fails_loudly() {
        let bridge = PersistenceBridge::new(Arc::new(MemoryAdapter::new()));
        let result = bridge.on_state_changed(None, AuthState::SignedIn).await;
        assert!(matches!(result, Err(AuthError::MissingSession)));
    }

    #[tokio::test]
    async fn test_bridge_destroys_on_signed_out_and_shutdown() {
        let adapter = Arc::new(MemoryAdapter::new());
        let bridge = PersistenceBridge::new(adapter.clone());
        let session = sample_session();

        adapter.save(&session).await.unwrap();
        bridge
            .on_state_changed(None, AuthState::SignedOut)
            .await
            .unwrap();
        assert!(adapter.load().await.unwrap().is_none());

        adapter.save(&session).await.unwrap();
        bridge
            .on_state_changed(None, AuthState::Shutdown)
            .await
            .unwrap();
        assert!(adapter.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_loads_on_client_launch() {
        let adapter = Arc::new(MemoryAdapter::new());
        let session = sample_session();
        adapter.save(&session).await.unwrap();

        let bridge = PersistenceBridge::new(adapter);
        bridge
            .on_state_changed(None, AuthState::ClientLaunch)
            .await
            .unwrap();

        assert_eq!(bridge.take_loaded().await, Some(session));
        // The slot is take-once
        assert!(bridge.take_loaded().await.is_none());
    }

    #[tokio::test]
    async fn test_bridge_ignores_password_recovery() {
        let adapter = Arc::new(MemoryAdapter::new());
        let session = sample_session();
        adapter.save(&session).await.unwrap();

        let bridge = PersistenceBridge::new(adapter.clone());
        bridge
            .on_state_changed(Some(&session), AuthState::PasswordRecovery)
            .await
            .unwrap();

        // Nothing saved, destroyed or loaded
        assert!(adapter.load().await.unwrap().is_some());
        assert!(bridge.take_loaded().await.is_none());
    }
}
