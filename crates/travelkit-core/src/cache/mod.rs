//! Local cache for user-scoped data.
//!
//! Host features keep documents that belong to the signed-in user as JSON
//! files in one directory. The session manager wipes them whenever the
//! user's session ends.

pub mod manager;

pub use manager::CacheManager;
