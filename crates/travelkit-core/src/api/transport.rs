//! The narrow request interface between the session manager and the network.

use std::future::Future;

use serde::Deserialize;

use crate::auth::{AuthError, SessionKind};

/// One request per authentication or account flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    DeviceSession,
    UserCredentials { username: String, password: String },
    FacebookToken { access_token: String },
    GoogleIdToken { id_token: String },
    Jwt { token: String },
    MagicLink { token: String },
    Register {
        access_token: String,
        full_name: String,
        email: String,
        password: String,
    },
    ResetPassword { access_token: String, email: String },
    MagicLinkFetch { access_token: String },
    SignOut { access_token: String },
}

impl AuthRequest {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AuthRequest::DeviceSession => "device_session",
            AuthRequest::UserCredentials { .. } => "user_credentials",
            AuthRequest::FacebookToken { .. } => "facebook",
            AuthRequest::GoogleIdToken { .. } => "google",
            AuthRequest::Jwt { .. } => "jwt",
            AuthRequest::MagicLink { .. } => "magic_link",
            AuthRequest::Register { .. } => "register",
            AuthRequest::ResetPassword { .. } => "reset_password",
            AuthRequest::MagicLinkFetch { .. } => "magic_link_fetch",
            AuthRequest::SignOut { .. } => "sign_out",
        }
    }

    /// Kind of session a successful grant for this request produces.
    pub fn session_kind(&self) -> SessionKind {
        match self {
            AuthRequest::DeviceSession => SessionKind::Device,
            _ => SessionKind::User,
        }
    }

    /// Access token the request is authorized with, for bearer requests.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            AuthRequest::Register { access_token, .. }
            | AuthRequest::ResetPassword { access_token, .. }
            | AuthRequest::MagicLinkFetch { access_token }
            | AuthRequest::SignOut { access_token } => Some(access_token),
            _ => None,
        }
    }
}

/// Token material returned by a successful sign-in exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds. Absent for long-lived sessions.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    Tokens(TokenGrant),
    /// Action-only flows (register, reset password, sign-out)
    Accepted,
    MagicLinkToken(String),
}

/// Performs one network exchange per call and always resolves, with either
/// a response or a classified [`AuthError`]. Timeouts belong here, not in
/// the session manager.
pub trait AuthTransport: Send + Sync + 'static {
    fn execute(
        &self,
        request: AuthRequest,
    ) -> impl Future<Output = Result<AuthResponse, AuthError>> + Send;
}
