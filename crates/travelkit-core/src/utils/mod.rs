//! Utility functions for string formatting and masking.

pub mod format;

pub use format::{mask_secret, truncate};
