// Auth client
// Ties the store, state machine, scheduler and persistence bridge together
// around an injected auth API collaborator. Constructed and passed around
// explicitly; there is no process-wide instance.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

use crate::api::{AuthApi, SignInRequest, SignUpRequest, UserAttributes, VerifyOtpRequest};
use crate::config::ClientOptions;
use crate::diagnostics::DiagnosticSink;
use crate::error::{ApiFailure, AuthError, Result};
use crate::persistence::{PersistenceAdapter, PersistenceBridge};
use crate::scheduler::{
    wall_clock, ArmOutcome, RefreshHook, RefreshScheduler, SchedulerPhase, TimeSource,
};
use crate::session::{Session, User};
use crate::state::{AuthState, AuthStateMachine, ListenerHandle, StateChangedListener};
use crate::store::SessionStore;

struct ClientInner {
    api: Arc<dyn AuthApi>,
    options: ClientOptions,
    store: SessionStore,
    state: AuthStateMachine,
    scheduler: Arc<RefreshScheduler>,
    bridge: Option<Arc<PersistenceBridge>>,
    clock: TimeSource,
    online: AtomicBool,
    /// Serializes foreground and background refresh attempts so two calls
    /// never race on the same refresh token
    refresh_lock: Mutex<()>,
    sink: DiagnosticSink,
}

/// Listener that arms and retires the refresh scheduler on lifecycle
/// transitions. Registered through the ordinary listener registry, same as
/// any application listener.
struct SchedulerListener {
    inner: Weak<ClientInner>,
}

#[async_trait]
impl StateChangedListener for SchedulerListener {
    async fn on_state_changed(&self, session: Option<&Session>, state: AuthState) -> Result<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        match state {
            AuthState::SignedIn | AuthState::UserUpdated => {
                if let ArmOutcome::SessionExpired = inner.scheduler.arm_for(session).await {
                    inner.transition_signed_out().await;
                }
            }
            AuthState::SignedOut => inner.scheduler.stop().await,
            AuthState::Shutdown => inner.scheduler.shutdown().await,
            _ => {}
        }
        Ok(())
    }
}

impl ClientInner {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Clear the store first so listeners observe a consistent no-session
    /// state during the `SignedOut` broadcast
    async fn transition_signed_out(&self) {
        self.store.clear().await;
        self.state.notify(None, AuthState::SignedOut).await;
    }

    async fn install_session(&self, session: &Session, state: AuthState) {
        self.store.set(session.clone()).await;
        self.state.notify(Some(session), state).await;
    }

    async fn fail_and_sign_out(&self, failure: ApiFailure) -> AuthError {
        let err = AuthError::from_failure(failure, self.is_online());
        self.transition_signed_out().await;
        err
    }

    async fn rearm_after_refresh(&self, session: Option<&Session>) {
        if !self.options.auto_refresh_token {
            return;
        }
        if let ArmOutcome::SessionExpired = self.scheduler.arm_for(session).await {
            self.transition_signed_out().await;
        }
    }

    /// Refresh the current session. The caller must hold `refresh_lock`.
    async fn refresh_holding_lock(&self) -> Result<Session> {
        let current = self
            .store
            .get()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        match self.api.refresh(&current.refresh_token).await {
            Ok(fresh) => {
                self.install_session(&fresh, AuthState::TokenRefreshed).await;
                self.rearm_after_refresh(Some(&fresh)).await;
                Ok(fresh)
            }
            Err(failure) => Err(self.fail_and_sign_out(failure).await),
        }
    }

    /// Timer-fired refresh attempt. Never propagates: failures go to the
    /// diagnostic sink and the scheduler rearms against the current session.
    async fn background_refresh(&self) {
        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.store.get().await else {
            self.rearm_after_refresh(None).await;
            return;
        };

        match self.api.refresh(&current.refresh_token).await {
            Ok(fresh) => {
                // The state may have moved to signed-out/shutdown while the
                // call was in flight; discard the result in that case
                if self.scheduler.phase().await == SchedulerPhase::Stopped {
                    return;
                }
                self.install_session(&fresh, AuthState::TokenRefreshed).await;
                self.rearm_after_refresh(Some(&fresh)).await;
            }
            Err(failure) => {
                let err = AuthError::from_failure(failure, self.is_online());
                tracing::warn!("Background token refresh failed: {}", err);
                self.sink
                    .report("background token refresh failed", Some(&err));

                if self.scheduler.phase().await == SchedulerPhase::Stopped {
                    return;
                }
                let snapshot = self.store.get().await;
                self.rearm_after_refresh(snapshot.as_ref()).await;
            }
        }
    }
}

/// Client-side session lifecycle manager.
///
/// Holds the currently authenticated session, keeps the access token fresh
/// with a background refresh timer, broadcasts lifecycle transitions to
/// registered listeners, and mirrors the session into the persistence
/// adapter. The auth API itself is an injected collaborator.
pub struct AuthClient {
    inner: Arc<ClientInner>,
}

impl AuthClient {
    /// Build a client around an auth API and a persistence adapter.
    ///
    /// The persistence bridge and the refresh scheduler are registered as
    /// ordinary state-changed listeners, subject to `options`.
    pub async fn new(
        api: Arc<dyn AuthApi>,
        adapter: Arc<dyn PersistenceAdapter>,
        options: ClientOptions,
    ) -> Self {
        Self::with_time_source(api, adapter, options, wall_clock()).await
    }

    /// Build a client whose expiry and deadline arithmetic reads `clock`
    /// instead of the system wall clock. Timer behaviour can then be driven
    /// deterministically from a paused test runtime.
    pub async fn with_time_source(
        api: Arc<dyn AuthApi>,
        adapter: Arc<dyn PersistenceAdapter>,
        options: ClientOptions,
        clock: TimeSource,
    ) -> Self {
        let sink = DiagnosticSink::new();

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let hook: RefreshHook = {
                let weak = weak.clone();
                Arc::new(move || {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.background_refresh().await;
                        }
                    })
                })
            };

            ClientInner {
                api,
                scheduler: Arc::new(RefreshScheduler::with_time_source(
                    options.max_refresh_wait_secs,
                    hook,
                    clock.clone(),
                )),
                store: SessionStore::new(),
                state: AuthStateMachine::new(sink.clone()),
                bridge: options
                    .persist_session
                    .then(|| Arc::new(PersistenceBridge::new(adapter))),
                clock,
                online: AtomicBool::new(true),
                refresh_lock: Mutex::new(()),
                sink,
                options,
            }
        });

        if let Some(bridge) = &inner.bridge {
            inner.state.add_listener(bridge.clone()).await;
        }
        if inner.options.auto_refresh_token {
            inner
                .state
                .add_listener(Arc::new(SchedulerListener {
                    inner: Arc::downgrade(&inner),
                }))
                .await;
        }

        Self { inner }
    }

    // === Foreground operations ===

    /// Register a new account. On success the returned session is installed
    /// and `SignedIn` is broadcast; on failure the classified error is
    /// returned and `SignedOut` is broadcast.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<Session> {
        match self.inner.api.sign_up(&request).await {
            Ok(session) => {
                self.inner
                    .install_session(&session, AuthState::SignedIn)
                    .await;
                Ok(session)
            }
            Err(failure) => Err(self.inner.fail_and_sign_out(failure).await),
        }
    }

    /// Authenticate with a password
    pub async fn sign_in(&self, request: SignInRequest) -> Result<Session> {
        match self.inner.api.sign_in(&request).await {
            Ok(session) => {
                self.inner
                    .install_session(&session, AuthState::SignedIn)
                    .await;
                Ok(session)
            }
            Err(failure) => Err(self.inner.fail_and_sign_out(failure).await),
        }
    }

    /// Exchange a one-time password for a session
    pub async fn verify_otp(&self, request: VerifyOtpRequest) -> Result<Session> {
        match self.inner.api.verify_otp(&request).await {
            Ok(session) => {
                self.inner
                    .install_session(&session, AuthState::SignedIn)
                    .await;
                Ok(session)
            }
            Err(failure) => Err(self.inner.fail_and_sign_out(failure).await),
        }
    }

    /// Explicitly refresh the current session.
    ///
    /// Serialized with the background timer through the refresh mutex.
    /// Calling this with no current session is a programming error and
    /// returns [`AuthError::NotAuthenticated`] without any state transition.
    pub async fn refresh_session(&self) -> Result<Session> {
        let _guard = self.inner.refresh_lock.lock().await;
        self.inner.refresh_holding_lock().await
    }

    /// Update the authenticated user's attributes. The session's user is
    /// replaced wholesale and `UserUpdated` is broadcast. A failed update
    /// keeps the current session intact.
    pub async fn update_user(&self, attributes: UserAttributes) -> Result<User> {
        let current = self
            .inner
            .store
            .get()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        match self
            .inner
            .api
            .update_user(&current.access_token, &attributes)
            .await
        {
            Ok(user) => {
                let mut session = current;
                session.user = user.clone();
                self.inner
                    .install_session(&session, AuthState::UserUpdated)
                    .await;
                Ok(user)
            }
            Err(failure) => Err(AuthError::from_failure(failure, self.inner.is_online())),
        }
    }

    /// Request a password recovery email and broadcast `PasswordRecovery`
    pub async fn recover_password(&self, email: &str) -> Result<()> {
        match self.inner.api.reset_password_for_email(email).await {
            Ok(()) => {
                let snapshot = self.inner.store.get().await;
                self.inner
                    .state
                    .notify(snapshot.as_ref(), AuthState::PasswordRecovery)
                    .await;
                Ok(())
            }
            Err(failure) => Err(AuthError::from_failure(failure, self.inner.is_online())),
        }
    }

    /// Sign out: best-effort server-side revoke, then clear the session and
    /// broadcast `SignedOut`
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.inner.store.get().await {
            if let Err(failure) = self.inner.api.sign_out(&session.access_token).await {
                let err = AuthError::from_failure(failure, self.inner.is_online());
                self.inner
                    .sink
                    .report("server-side sign-out failed", Some(&err));
            }
        }
        self.inner.transition_signed_out().await;
        Ok(())
    }

    /// Recover a persisted session at application startup.
    ///
    /// Broadcasts `ClientLaunch` (which makes the bridge load from the
    /// adapter), then decides what to do with the result: an unexpired
    /// session is installed as `SignedIn`, an expired one triggers a refresh
    /// attempt when auto-refresh is enabled, anything else is discarded.
    pub async fn launch(&self) -> Result<Option<Session>> {
        let snapshot = self.inner.store.get().await;
        self.inner
            .state
            .notify(snapshot.as_ref(), AuthState::ClientLaunch)
            .await;

        let Some(bridge) = &self.inner.bridge else {
            return Ok(None);
        };
        let Some(loaded) = bridge.take_loaded().await else {
            return Ok(None);
        };
        if loaded.access_token.is_empty() {
            return Ok(None);
        }

        if !loaded.is_expired_at((self.inner.clock)()) {
            self.inner
                .install_session(&loaded, AuthState::SignedIn)
                .await;
            return Ok(Some(loaded));
        }

        if !self.inner.options.auto_refresh_token {
            return Ok(None);
        }

        // Expired but refreshable: install quietly so the refresh token is
        // available, then go through the normal refresh path
        self.inner.store.set(loaded).await;
        let _guard = self.inner.refresh_lock.lock().await;
        match self.inner.refresh_holding_lock().await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(err) => {
                self.inner
                    .sink
                    .report("failed to refresh persisted session at launch", Some(&err));
                Ok(None)
            }
        }
    }

    /// Retire the client: broadcasts `Shutdown` (permanently stopping the
    /// scheduler and destroying persisted state), then drops the session
    pub async fn shutdown(&self) {
        let snapshot = self.inner.store.get().await;
        self.inner
            .state
            .notify(snapshot.as_ref(), AuthState::Shutdown)
            .await;
        self.inner.store.clear().await;
    }

    // === State access ===

    /// Snapshot of the current session
    pub async fn current_session(&self) -> Option<Session> {
        self.inner.store.get().await
    }

    /// The user carried by the current session
    pub async fn current_user(&self) -> Option<User> {
        self.inner.store.current_user().await
    }

    /// Externally supplied connectivity flag. While offline, every remote
    /// failure classifies as [`crate::FailureReason::Offline`].
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.is_online()
    }

    /// Current scheduler phase, for observability and tests
    pub async fn scheduler_phase(&self) -> SchedulerPhase {
        self.inner.scheduler.phase().await
    }

    /// Total refresh timers armed so far, for observability and tests
    pub fn timers_armed(&self) -> usize {
        self.inner.scheduler.armed_count()
    }

    // === Listener surface ===

    /// Register an application listener for lifecycle transitions
    pub async fn add_state_changed_listener(
        &self,
        listener: Arc<dyn StateChangedListener>,
    ) -> ListenerHandle {
        self.inner.state.add_listener(listener).await
    }

    pub async fn remove_state_changed_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.state.remove_listener(handle).await
    }

    /// Remove every registered listener.
    ///
    /// Warning: the persistence bridge and the refresh scheduler are wired in
    /// through this same registry, so clearing also disables auto-persistence
    /// and auto-refresh for the rest of the client's life.
    pub async fn clear_state_changed_listeners(&self) {
        self.inner.state.clear_listeners().await;
    }

    // === Diagnostics ===

    /// Register the diagnostic sink callback for non-fatal background
    /// information (refresh retries, listener errors)
    pub fn set_diagnostic_sink<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&AuthError>) + Send + Sync + 'static,
    {
        self.inner.sink.set(callback);
    }

    pub fn clear_diagnostic_sink(&self) {
        self.inner.sink.unset();
    }
}
