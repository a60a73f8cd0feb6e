// Session and user model types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A linked identity on the remote account (e.g. an OAuth provider link)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    #[serde(default)]
    pub identity_data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An enrolled authentication factor on the remote account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub id: String,
    pub factor_type: String,
    pub status: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

/// Identity projection of the remote account.
///
/// A `User` is owned exclusively by the `Session` that contains it and is
/// replaced wholesale on refresh or user-update, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub app_metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phone_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub factors: Vec<Factor>,
}

impl User {
    /// Minimal user with just an id, useful for constructing test fixtures
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            phone: None,
            user_metadata: HashMap::new(),
            app_metadata: HashMap::new(),
            email_confirmed_at: None,
            phone_confirmed_at: None,
            created_at: None,
            updated_at: None,
            identities: Vec::new(),
            factors: Vec::new(),
        }
    }
}

/// An issued authentication session.
///
/// Immutable once issued: refresh and user-update replace the whole value
/// through the session store rather than mutating fields in place.
/// `created_at` is stamped at issuance on this side, not by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Lifetime of the access token in seconds, as reported by the server
    pub expires_in: i64,
    /// Issuance timestamp, stamped client-side when the session was received
    pub created_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    /// Build a session stamped with the current time as its issuance moment
    pub fn issued_now(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: i64,
        user: User,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
            expires_in: expires_in.max(0),
            created_at: Utc::now(),
            user,
        }
    }

    /// Absolute expiry: `created_at + expires_in`.
    ///
    /// `expires_in` is an open field that may arrive from a persisted file,
    /// so out-of-range values saturate to the far future instead of
    /// panicking inside the date arithmetic.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| self.created_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the access token has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whether the access token has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
