//! Session and authentication core for the TravelKit SDK.
//!
//! One [`SessionManager`](auth::SessionManager) per process owns the current
//! session. It drives every sign-in flow through an
//! [`AuthTransport`](api::AuthTransport), mirrors the session into a
//! [`CredentialStore`](auth::CredentialStore), and reports backend
//! revocation through the [`EventsHub`](events::EventsHub).

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod events;
pub mod utils;

pub use api::{ApiClient, AuthRequest, AuthResponse, AuthTransport, TokenGrant};
pub use auth::{AuthError, CredentialStore, Session, SessionKind, SessionManager, SessionState};
pub use events::{EventsHub, RevocationHandler};
