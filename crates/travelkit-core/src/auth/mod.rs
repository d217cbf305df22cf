//! Authentication module for managing the SDK session.
//!
//! This module provides:
//! - `Session`: issued credential material with an optional validity window
//! - `SessionManager`: the single owner of the current session and every
//!   sign-in, account and sign-out flow
//! - `CredentialStore`: durable mirror of the current session (file,
//!   OS keychain or memory)

pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;
mod validation;

pub use credentials::{CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use error::AuthError;
pub use manager::{SessionManager, SessionState};
pub use session::{Session, SessionInvariantError, SessionKind};
