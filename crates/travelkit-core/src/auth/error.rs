use thiserror::Error;

/// Classified outcome of a failed authentication or account flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed or missing input, detected before any network exchange.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// A Facebook/Google token was well-formed but already expired.
    #[error("Provider token expired")]
    ProviderTokenExpired,

    /// A single-use magic link token was presented twice.
    #[error("Token already consumed")]
    TokenAlreadyConsumed,

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The backend rejected the credentials of the currently held session.
    /// Drives the revocation path and is never handed back to a flow caller.
    #[error("Session revoked")]
    SessionRevoked,
}

impl AuthError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AuthError::InvalidArgument(message.into())
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        AuthError::RequestFailed(message.into())
    }
}
