// Auth state machine and listener registry

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::session::Session;

/// Lifecycle transitions broadcast to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
    ClientLaunch,
    Shutdown,
}

/// Observer of auth lifecycle transitions.
///
/// Listeners receive a snapshot of the current session alongside the new
/// state. Errors returned here are reported to the diagnostic sink; they do
/// not stop the remaining listeners from running.
#[async_trait]
pub trait StateChangedListener: Send + Sync {
    async fn on_state_changed(&self, session: Option<&Session>, state: AuthState) -> Result<()>;
}

/// Handle returned by listener registration, usable for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct FnListener<F>(F);

#[async_trait]
impl<F> StateChangedListener for FnListener<F>
where
    F: Fn(Option<&Session>, AuthState) + Send + Sync,
{
    async fn on_state_changed(&self, session: Option<&Session>, state: AuthState) -> Result<()> {
        (self.0)(session, state);
        Ok(())
    }
}

/// Wrap a plain closure as a [`StateChangedListener`]
pub fn listener_fn<F>(f: F) -> Arc<dyn StateChangedListener>
where
    F: Fn(Option<&Session>, AuthState) + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

/// Ordered registry of state-changed listeners.
///
/// `notify` invokes every registered listener in registration order, one at a
/// time. The persistence bridge and the refresh scheduler are wired in through
/// this same registry; they hold no privileged position.
pub struct AuthStateMachine {
    listeners: RwLock<Vec<(ListenerHandle, Arc<dyn StateChangedListener>)>>,
    next_id: AtomicU64,
    sink: DiagnosticSink,
}

impl AuthStateMachine {
    pub fn new(sink: DiagnosticSink) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sink,
        }
    }

    /// Register a listener. Listeners run in registration order.
    pub async fn add_listener(&self, listener: Arc<dyn StateChangedListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().await.push((handle, listener));
        handle
    }

    /// Remove a previously registered listener. Returns false when the handle
    /// is not (or no longer) registered.
    pub async fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    /// Remove every registered listener.
    ///
    /// This includes the built-in persistence and refresh listeners, so it
    /// disables auto-persistence and auto-refresh as a side effect.
    pub async fn clear_listeners(&self) {
        self.listeners.write().await.clear();
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Broadcast a transition to all listeners, in registration order.
    ///
    /// A failing listener is reported to the diagnostic sink and the
    /// remaining listeners still run.
    pub async fn notify(&self, session: Option<&Session>, state: AuthState) {
        tracing::debug!("auth state transition: {:?}", state);

        // Snapshot the registry so listeners may themselves add/remove
        // listeners or trigger nested transitions without deadlocking.
        let snapshot: Vec<_> = self.listeners.read().await.clone();

        for (handle, listener) in snapshot {
            if let Err(err) = listener.on_state_changed(session, state).await {
                self.sink.report(
                    &format!("listener {:?} failed on {:?}", handle, state),
                    Some(&err),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_listeners_run_in_registration_order() {
        let machine = AuthStateMachine::new(DiagnosticSink::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            machine
                .add_listener(listener_fn(move |_, _| {
                    order.lock().unwrap().push(tag);
                }))
                .await;
        }

        machine.notify(None, AuthState::SignedOut).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_remove_listener_by_handle() {
        let machine = AuthStateMachine::new(DiagnosticSink::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let handle = machine
            .add_listener(listener_fn(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        machine.notify(None, AuthState::SignedOut).await;
        assert!(machine.remove_listener(handle).await);
        machine.notify(None, AuthState::SignedOut).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Removing twice reports the handle as gone
        assert!(!machine.remove_listener(handle).await);
    }

    #[tokio::test]
    async fn test_clear_listeners_removes_everything() {
        let machine = AuthStateMachine::new(DiagnosticSink::new());
        machine.add_listener(listener_fn(|_, _| {})).await;
        machine.add_listener(listener_fn(|_, _| {})).await;
        assert_eq!(machine.listener_count().await, 2);

        machine.clear_listeners().await;
        assert_eq!(machine.listener_count().await, 0);
    }

    struct FailingListener;

    #[async_trait]
    impl StateChangedListener for FailingListener {
        async fn on_state_changed(&self, _: Option<&Session>, _: AuthState) -> Result<()> {
            Err(AuthError::MissingSession)
        }
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_subsequent_ones() {
        let sink = DiagnosticSink::new();
        let reported = Arc::new(AtomicUsize::new(0));
        let reports = reported.clone();
        sink.set(move |_, _| {
            reports.fetch_add(1, Ordering::SeqCst);
        });

        let machine = AuthStateMachine::new(sink);
        machine.add_listener(Arc::new(FailingListener)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        machine
            .add_listener(listener_fn(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        machine.notify(None, AuthState::SignedIn).await;

        // The listener after the failing one still ran, and the failure was
        // reported to the sink rather than swallowed.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notify_passes_session_snapshot() {
        let machine = AuthStateMachine::new(DiagnosticSink::new());
        let seen = Arc::new(Mutex::new(None));

        let slot = seen.clone();
        machine
            .add_listener(listener_fn(move |session, _| {
                *slot.lock().unwrap() = session.map(|s| s.access_token.clone());
            }))
            .await;

        let session = Session::issued_now(
            "access",
            "refresh",
            "bearer",
            3600,
            crate::session::User::with_id("u1"),
        );
        machine.notify(Some(&session), AuthState::SignedIn).await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("access"));
    }
}
