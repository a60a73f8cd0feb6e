// Error taxonomy and remote failure classification

use thiserror::Error;

/// Stable reason taxonomy for failed remote calls.
///
/// Derived deterministically from the (status code, response body) pair of a
/// failed API call, never from the shape of the transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Unknown,
    BadPassword,
    BadEmailAddress,
    MissingInformation,
    AlreadyRegistered,
    InvalidRefreshToken,
    AdminTokenRequired,
    Offline,
}

/// Raw outcome of a failed auth API call.
///
/// Transport-level failures (connection refused, DNS, etc.) are reported with
/// `status == 0` and the transport message as the body.
#[derive(Debug, Clone, Error)]
#[error("auth API call failed: {status} - {body}")]
pub struct ApiFailure {
    pub status: u16,
    pub body: String,
}

impl ApiFailure {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Known server error phrases, matched by substring containment
const CLASSIFICATION_RULES: &[(u16, &str, FailureReason)] = &[
    (400, "already registered", FailureReason::AlreadyRegistered),
    (400, "Invalid Refresh Token", FailureReason::InvalidRefreshToken),
    (401, "requires a Bearer token", FailureReason::AdminTokenRequired),
    (422, "Password should be at least", FailureReason::BadPassword),
    (
        422,
        "Unable to validate email address",
        FailureReason::BadEmailAddress,
    ),
    (
        422,
        "provide your email or phone number",
        FailureReason::MissingInformation,
    ),
];

/// Classify a failed remote call into a [`FailureReason`].
///
/// `online` is the externally supplied connectivity flag: when it is false
/// every failure is `Offline` regardless of status code.
pub fn classify(status: u16, body: &str, online: bool) -> FailureReason {
    if !online {
        return FailureReason::Offline;
    }
    for (rule_status, phrase, reason) in CLASSIFICATION_RULES {
        if *rule_status == status && body.contains(phrase) {
            return *reason;
        }
    }
    FailureReason::Unknown
}

/// Errors surfaced by session lifecycle operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// A remote call failed; `reason` is the classified failure so callers
    /// can branch without parsing the message text
    #[error("auth API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        reason: FailureReason,
    },

    /// An operation that requires an authenticated session was called with
    /// no current session. Always surfaced synchronously to the caller.
    #[error("operation requires an authenticated session")]
    NotAuthenticated,

    /// The persistence bridge was asked to save with no session in the store
    #[error("no session present in the store")]
    MissingSession,

    /// The persistence adapter failed
    #[error("persistence adapter failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl AuthError {
    /// Classify an [`ApiFailure`] against the current connectivity flag
    pub fn from_failure(failure: ApiFailure, online: bool) -> Self {
        let reason = classify(failure.status, &failure.body, online);
        AuthError::Api {
            status: failure.status,
            message: failure.body,
            reason,
        }
    }

    /// The classified reason, when this error came from a remote call
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            AuthError::Api { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result type alias for session lifecycle operations
pub type Result<T> = std::result::Result<T, AuthError>;
