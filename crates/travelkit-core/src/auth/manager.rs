//! The session manager: owner of the one authoritative session.
//!
//! Every session-producing flow follows the same shape:
//!
//! 1. validate inputs synchronously (`InvalidArgument`, no network)
//! 2. run one exchange through the [`AuthTransport`]
//! 3. on success, build a [`Session`] and commit it: assign it as current
//!    and persist it, under the commit lock
//! 4. on failure, hand back the classified error with state untouched
//!
//! Concurrent flows are never rejected. They serialize at the commit, and
//! whichever commits last wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::api::{AuthRequest, AuthResponse, AuthTransport, TokenGrant};
use crate::cache::CacheManager;
use crate::events::EventsHub;
use crate::utils::mask_secret;

use super::validation::{require_email, require_jwt, require_non_empty};
use super::{AuthError, CredentialStore, Session};

/// Observable lifecycle of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    /// At least one flow is waiting on the transport.
    Authenticating,
    Authenticated,
}

pub struct SessionManager<T: AuthTransport> {
    transport: T,
    store: Box<dyn CredentialStore>,
    events: Arc<EventsHub>,
    user_cache: Option<CacheManager>,
    current: RwLock<Option<Session>>,
    /// Serializes "assign current, then persist" across flows
    commit_lock: Mutex<()>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a flow ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: AuthTransport> SessionManager<T> {
    /// Build the manager, seeding the current session from the store.
    ///
    /// A persisted session that fails to load or has already expired is
    /// dropped and cleared from the store.
    pub fn new(transport: T, store: Box<dyn CredentialStore>, events: Arc<EventsHub>) -> Self {
        let current = match store.load() {
            Ok(Some(session)) if session.is_valid(Utc::now()) => {
                debug!(session_id = session.id(), kind = ?session.kind(), "Restored persisted session");
                Some(session)
            }
            Ok(Some(session)) => {
                debug!(session_id = session.id(), "Persisted session expired, discarding");
                if let Err(e) = store.clear() {
                    warn!(error = %e, "Failed to clear expired session from store");
                }
                None
            }
            Ok(None) => {
                debug!("No persisted session found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session, starting signed out");
                if let Err(e) = store.clear() {
                    warn!(error = %e, "Failed to clear unreadable session from store");
                }
                None
            }
        };

        Self {
            transport,
            store,
            events,
            user_cache: None,
            current: RwLock::new(current),
            commit_lock: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Attach the user-scoped cache wiped on sign-out and revocation.
    pub fn with_user_cache(mut self, cache: CacheManager) -> Self {
        self.user_cache = Some(cache);
        self
    }

    pub fn events(&self) -> &Arc<EventsHub> {
        &self.events
    }

    /// Snapshot of the current session
    pub fn current_session(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn state(&self) -> SessionState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            SessionState::Authenticating
        } else if self.current_session().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::NoSession
        }
    }

    /// Drop the session from memory, storage and the user cache.
    /// Idempotent. Storage failures are logged, never returned.
    pub fn clear_user_data(&self) {
        let _commit = self.lock_commit();
        self.clear_locked();
    }

    /// Clear memory, storage and the user cache. Caller holds the commit lock.
    fn clear_locked(&self) {
        self.set_current(None);
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
        if let Some(ref cache) = self.user_cache {
            if let Err(e) = cache.clear() {
                warn!(error = %e, "Failed to clear user data cache");
            }
        }
        debug!("User data cleared");
    }

    /// React to the backend rejecting the held credentials: clear everything
    /// and notify the registered revocation handler exactly once.
    pub fn handle_revoked_credentials(&self) {
        info!("Session credentials revoked by backend");
        self.clear_user_data();
        self.events.notify_revocation();
    }

    // ===== Session-producing flows =====

    /// Fetch an anonymous device session
    pub async fn perform_device_session_fetch(&self) -> Result<Session, AuthError> {
        self.authenticate(AuthRequest::DeviceSession).await
    }

    pub async fn perform_user_credentials_auth(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        require_non_empty("Username", username)?;
        require_non_empty("Password", password)?;
        self.authenticate(AuthRequest::UserCredentials {
            username: username.trim().to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn perform_facebook_auth(&self, access_token: &str) -> Result<Session, AuthError> {
        require_non_empty("Facebook access token", access_token)?;
        self.authenticate(AuthRequest::FacebookToken {
            access_token: access_token.to_string(),
        })
        .await
    }

    pub async fn perform_google_auth(&self, id_token: &str) -> Result<Session, AuthError> {
        require_non_empty("Google ID token", id_token)?;
        self.authenticate(AuthRequest::GoogleIdToken {
            id_token: id_token.to_string(),
        })
        .await
    }

    pub async fn perform_jwt_auth(&self, token: &str) -> Result<Session, AuthError> {
        require_jwt(token)?;
        self.authenticate(AuthRequest::Jwt {
            token: token.to_string(),
        })
        .await
    }

    pub async fn perform_magic_link_auth(&self, token: &str) -> Result<Session, AuthError> {
        require_non_empty("Magic link token", token)?;
        self.authenticate(AuthRequest::MagicLink {
            token: token.to_string(),
        })
        .await
    }

    // ===== Account flows =====

    pub async fn perform_user_register(
        &self,
        access_token: &str,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        require_non_empty("Access token", access_token)?;
        require_non_empty("Full name", full_name)?;
        require_email(email)?;
        require_non_empty("Password", password)?;

        let request = AuthRequest::Register {
            access_token: access_token.to_string(),
            full_name: full_name.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        match self.exchange(request).await? {
            AuthResponse::Accepted => {
                info!("User registered");
                Ok(())
            }
            other => Err(unexpected_response("register", &other)),
        }
    }

    pub async fn perform_password_reset(
        &self,
        access_token: &str,
        email: &str,
    ) -> Result<(), AuthError> {
        require_non_empty("Access token", access_token)?;
        require_email(email)?;

        let request = AuthRequest::ResetPassword {
            access_token: access_token.to_string(),
            email: email.trim().to_string(),
        };
        match self.exchange(request).await? {
            AuthResponse::Accepted => {
                info!("Password reset requested");
                Ok(())
            }
            other => Err(unexpected_response("reset_password", &other)),
        }
    }

    /// Mint a single-use magic link token for the given session
    pub async fn perform_magic_link_fetch(&self, access_token: &str) -> Result<String, AuthError> {
        require_non_empty("Access token", access_token)?;

        let request = AuthRequest::MagicLinkFetch {
            access_token: access_token.to_string(),
        };
        match self.exchange(request).await? {
            AuthResponse::MagicLinkToken(token) if !token.is_empty() => Ok(token),
            other => Err(unexpected_response("magic_link_fetch", &other)),
        }
    }

    /// Sign out locally, then tell the backend on a best-effort basis.
    /// Never fails: a backend error is only logged.
    pub async fn perform_sign_out(&self) {
        let previous = self.current_session();
        self.clear_user_data();
        info!("Signed out");

        let Some(session) = previous else {
            return;
        };
        let request = AuthRequest::SignOut {
            access_token: session.access_token().to_string(),
        };
        if let Err(e) = self.transport.execute(request).await {
            warn!(error = %e, "Backend sign-out failed, local session already cleared");
        }
    }

    // ===== Internals =====

    async fn authenticate(&self, request: AuthRequest) -> Result<Session, AuthError> {
        let kind = request.session_kind();
        let flow = request.name();

        let grant = match self.exchange(request).await? {
            AuthResponse::Tokens(grant) => grant,
            other => return Err(unexpected_response(flow, &other)),
        };

        let session = build_session(grant, kind)?;
        self.commit(session.clone());
        info!(flow, session_id = session.id(), kind = ?kind, "Authentication succeeded");
        Ok(session)
    }

    /// Run one transport exchange. A revocation report about the held
    /// session triggers the revocation path and reaches the caller as
    /// `InvalidCredentials`.
    async fn exchange(&self, request: AuthRequest) -> Result<AuthResponse, AuthError> {
        let flow = request.name();
        let bearer = request.bearer_token().map(str::to_string);

        let result = {
            let _flow = InFlightGuard::enter(&self.in_flight);
            debug!(flow, "Sending auth request");
            self.transport.execute(request).await
        };

        match result {
            Ok(response) => Ok(response),
            Err(AuthError::SessionRevoked) => {
                if self.clear_if_current(bearer.as_deref()) {
                    info!(flow, "Session credentials revoked by backend");
                    self.events.notify_revocation();
                } else {
                    debug!(
                        flow,
                        token = ?bearer.as_deref().map(mask_secret),
                        "Rejected token is not the current session's"
                    );
                }
                Err(AuthError::InvalidCredentials)
            }
            Err(e) => {
                debug!(flow, error = %e, "Auth request failed");
                Err(e)
            }
        }
    }

    /// Clear everything if `token` is still the current session's access
    /// token. Compare and clear run under one commit lock.
    fn clear_if_current(&self, token: Option<&str>) -> bool {
        let Some(token) = token else {
            return false;
        };
        let _commit = self.lock_commit();
        let is_current = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|session| session.access_token() == token);
        if is_current {
            self.clear_locked();
        }
        is_current
    }

    /// Assign and persist as one step. A storage failure is logged and the
    /// in-memory session stays authoritative until the next successful save.
    fn commit(&self, session: Session) {
        let _commit = self.lock_commit();
        self.set_current(Some(session.clone()));
        if let Err(e) = self.store.save(&session) {
            warn!(session_id = session.id(), error = %e, "Failed to persist session");
        }
    }

    fn set_current(&self, session: Option<Session>) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    fn lock_commit(&self) -> std::sync::MutexGuard<'_, ()> {
        self.commit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_session(grant: TokenGrant, kind: super::SessionKind) -> Result<Session, AuthError> {
    let issued_at = Utc::now();
    let expires_at = match grant.expires_in {
        Some(secs) if secs > 0 => {
            let expires_at = Duration::try_seconds(secs)
                .and_then(|lifetime| issued_at.checked_add_signed(lifetime));
            match expires_at {
                Some(expires_at) => Some(expires_at),
                None => {
                    return Err(AuthError::request_failed(format!(
                        "backend returned out-of-range token lifetime: {}",
                        secs
                    )))
                }
            }
        }
        Some(secs) => {
            return Err(AuthError::request_failed(format!(
                "backend returned non-positive token lifetime: {}",
                secs
            )))
        }
        None => None,
    };

    Session::new(grant.access_token, grant.refresh_token, issued_at, expires_at, kind)
        .map_err(|e| AuthError::request_failed(format!("backend returned unusable session: {}", e)))
}

fn unexpected_response(flow: &str, response: &AuthResponse) -> AuthError {
    let shape = match response {
        AuthResponse::Tokens(_) => "tokens",
        AuthResponse::Accepted => "accepted",
        AuthResponse::MagicLinkToken(_) => "magic link token",
    };
    AuthError::request_failed(format!("unexpected {} response to {} request", shape, flow))
}
