use serde::Deserialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::utils::truncate;

use super::AuthRequest;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 400 and 401 responses, with the OAuth error code when the body has one
    #[error("Rejected ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// OAuth2-style error body, e.g. `{"error":"invalid_grant","error_description":"..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        let code = parsed.as_ref().and_then(|b| b.error.clone());
        let message = parsed
            .and_then(|b| b.error_description.or(b.message))
            .unwrap_or_else(|| truncate(body, MAX_ERROR_BODY_LENGTH));

        match status.as_u16() {
            400 | 401 => ApiError::Rejected {
                status: status.as_u16(),
                code,
                message,
            },
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            410 => ApiError::Gone(message),
            422 => ApiError::Unprocessable(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Classify a transport failure for the flow that produced it
    pub fn into_auth_error(self, request: &AuthRequest) -> AuthError {
        match (self, request) {
            // Bearer requests are authorized by the held session. A 401 there
            // means the backend no longer accepts it.
            (ApiError::Rejected { status: 401, .. }, req) if req.bearer_token().is_some() => {
                AuthError::SessionRevoked
            }

            (ApiError::Rejected { message, .. }, AuthRequest::FacebookToken { .. } | AuthRequest::GoogleIdToken { .. })
                if mentions(&message, &["expired"]) =>
            {
                AuthError::ProviderTokenExpired
            }

            (ApiError::Gone(_), AuthRequest::MagicLink { .. }) => AuthError::TokenAlreadyConsumed,
            (ApiError::Rejected { message, .. }, AuthRequest::MagicLink { .. })
                if mentions(&message, &["used", "consumed"]) =>
            {
                AuthError::TokenAlreadyConsumed
            }

            (
                ApiError::Rejected { .. },
                AuthRequest::DeviceSession
                | AuthRequest::UserCredentials { .. }
                | AuthRequest::FacebookToken { .. }
                | AuthRequest::GoogleIdToken { .. }
                | AuthRequest::Jwt { .. }
                | AuthRequest::MagicLink { .. },
            ) => AuthError::InvalidCredentials,

            (ApiError::Conflict(message) | ApiError::Unprocessable(message), AuthRequest::Register { .. }) => {
                AuthError::Registration(message)
            }

            (other, _) => AuthError::RequestFailed(other.to_string()),
        }
    }
}

fn mentions(message: &str, needles: &[&str]) -> bool {
    let lower = message.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}
