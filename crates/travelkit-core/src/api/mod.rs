//! Network side of authentication.
//!
//! This module provides the `AuthTransport` trait the session manager talks
//! to, and `ApiClient`, its HTTP implementation against the TravelKit
//! authentication service. Token grants follow OAuth2 conventions.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{AuthRequest, AuthResponse, AuthTransport, TokenGrant};
