// authkeep - client-side session lifecycle management
// Keeps a token-based auth session alive: stores it, refreshes it in the
// background before expiry, broadcasts lifecycle transitions and mirrors it
// into a pluggable persistence adapter.

pub mod api;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod persistence;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;

pub use api::{AuthApi, OtpType, SignInRequest, SignUpRequest, UserAttributes, VerifyOtpRequest};
pub use client::AuthClient;
pub use config::ClientOptions;
pub use error::{ApiFailure, AuthError, FailureReason, Result};
pub use persistence::{FileAdapter, MemoryAdapter, PersistenceAdapter, PersistenceBridge};
pub use scheduler::{wall_clock, SchedulerPhase, TimeSource};
pub use session::{Session, User};
pub use state::{listener_fn, AuthState, ListenerHandle, StateChangedListener};
pub use store::SessionStore;
