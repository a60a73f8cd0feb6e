// Auth API collaborator contract
// The wire-level HTTP machinery lives behind this trait; this crate only
// consumes outcomes (a populated session, or a typed failure with the raw
// status code and body).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ApiFailure;
use crate::session::{Session, User};

/// Sign-up credentials: email or phone, plus a password
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
    /// Arbitrary metadata stored on the new account
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl SignUpRequest {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone: None,
            password: password.into(),
            data: HashMap::new(),
        }
    }

    pub fn phone(phone: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: None,
            phone: Some(phone.into()),
            password: password.into(),
            data: HashMap::new(),
        }
    }
}

/// Sign-in credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
}

impl SignInRequest {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone: None,
            password: password.into(),
        }
    }

    pub fn phone(phone: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: None,
            phone: Some(phone.into()),
            password: password.into(),
        }
    }
}

/// Kind of one-time password being verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Sms,
    Email,
    Recovery,
    Invite,
}

/// One-time password verification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub token: String,
    pub otp_type: OtpType,
}

/// Mutable attributes for an authenticated user update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

/// Contract for the remote auth service.
///
/// Each call either returns a populated session/user or fails with the raw
/// (status, body) pair for classification. Implementations own request
/// construction, serialization, transport and any HTTP-level timeouts.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_up(&self, request: &SignUpRequest) -> std::result::Result<Session, ApiFailure>;

    async fn sign_in(&self, request: &SignInRequest) -> std::result::Result<Session, ApiFailure>;

    /// Exchange a refresh token for a new session
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<Session, ApiFailure>;

    async fn verify_otp(
        &self,
        request: &VerifyOtpRequest,
    ) -> std::result::Result<Session, ApiFailure>;

    async fn update_user(
        &self,
        access_token: &str,
        attributes: &UserAttributes,
    ) -> std::result::Result<User, ApiFailure>;

    /// Request a password recovery email for the account
    async fn reset_password_for_email(&self, email: &str) -> std::result::Result<(), ApiFailure>;

    /// Revoke the session server-side
    async fn sign_out(&self, access_token: &str) -> std::result::Result<(), ApiFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_request_email_constructor() {
        let request = SignUpRequest::email("a@b.c", "secret");
        assert_eq!(request.email.as_deref(), Some("a@b.c"));
        assert!(request.phone.is_none());
        assert_eq!(request.password, "secret");
    }

    #[test]
    fn test_sign_in_request_phone_constructor() {
        let request = SignInRequest::phone("+15551234567", "secret");
        assert_eq!(request.phone.as_deref(), Some("+15551234567"));
        assert!(request.email.is_none());
    }

    #[test]
    fn test_otp_type_wire_names() {
        assert_eq!(serde_json::to_string(&OtpType::Sms).unwrap(), "\"sms\"");
        assert_eq!(
            serde_json::to_string(&OtpType::Recovery).unwrap(),
            "\"recovery\""
        );
    }

    #[test]
    fn test_sign_up_request_omits_empty_fields() {
        let request = SignUpRequest::email("a@b.c", "secret");
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("phone"));
        assert!(!json.contains("data"));
    }
}
