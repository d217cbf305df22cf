use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::mask_secret;

/// Buffer before expiry within which a session should be renewed (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Whether a session represents an anonymous device or a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Device,
    User,
}

/// Persisted shape of a [`Session`]. Validated on the way back in.
#[doc(hidden)]
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionData {
    id: String,
    access_token: String,
    refresh_token: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    kind: SessionKind,
}

/// An issued authentication session. Immutable once constructed: renewing
/// or signing in again produces a new `Session` that replaces this one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionData", into = "SessionData")]
pub struct Session {
    id: String,
    access_token: String,
    refresh_token: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    kind: SessionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionInvariantError {
    #[error("access token is empty")]
    EmptyAccessToken,

    #[error("expiry {expires_at} is not after issuance {issued_at}")]
    ExpiryNotAfterIssuance {
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl Session {
    /// Build a session with a fresh random identifier.
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        kind: SessionKind,
    ) -> Result<Self, SessionInvariantError> {
        Self::validate(&access_token, issued_at, expires_at)?;
        Ok(Self {
            id: generate_session_id(),
            access_token,
            refresh_token,
            issued_at,
            expires_at,
            kind,
        })
    }

    fn validate(
        access_token: &str,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), SessionInvariantError> {
        if access_token.is_empty() {
            return Err(SessionInvariantError::EmptyAccessToken);
        }
        if let Some(expires_at) = expires_at {
            if expires_at <= issued_at {
                return Err(SessionInvariantError::ExpiryNotAfterIssuance {
                    issued_at,
                    expires_at,
                });
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_user_authenticated(&self) -> bool {
        self.kind == SessionKind::User
    }

    /// True if the session has no expiry or `at` is before it.
    pub fn is_valid(&self, at: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => at < expires_at,
            None => true,
        }
    }

    /// Check if the session will expire soon and should be renewed
    pub fn needs_refresh(&self, at: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => at + Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES) >= expires_at,
            None => false,
        }
    }

    /// Time left until expiry, `None` for sessions that never expire.
    pub fn time_until_expiry(&self, at: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at - at)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_secret))
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("kind", &self.kind)
            .finish()
    }
}

impl TryFrom<SessionData> for Session {
    type Error = SessionInvariantError;

    fn try_from(data: SessionData) -> Result<Self, Self::Error> {
        Self::validate(&data.access_token, data.issued_at, data.expires_at)?;
        Ok(Self {
            id: data.id,
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            issued_at: data.issued_at,
            expires_at: data.expires_at,
            kind: data.kind,
        })
    }
}

impl From<Session> for SessionData {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            kind: session.kind,
        }
    }
}

/// 128 random bits as 32 hex characters
fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
