//! Short-lived browser storage for auth flags and tokens.
//!
//! This crate provides:
//! - The [`BrowserStorage`] backend trait and an in-memory backend
//! - Storage key constants
//! - A [`Clock`] seam for expiry checks
//! - [`TokenManager`], the expiry tracker and single "clear everything" primitive

mod clock;
mod keys;
mod memory;
mod token_manager;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use token_manager::{
    AuthFlagSnapshot, PhoneIdentity, StoredTokens, TokenFamily, TokenManager, MAX_SKEW_SECS,
};
pub use traits::BrowserStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error (quota, disabled cookies, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys_are_unique() {
        let unique: std::collections::HashSet<_> = StorageKeys::ALL.iter().collect();
        assert_eq!(unique.len(), StorageKeys::ALL.len(), "Storage keys must be unique");
        assert!(StorageKeys::ALL.iter().all(|k| !k.is_empty()));
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Backend("quota exceeded".into());
        assert_eq!(err.to_string(), "Storage backend error: quota exceeded");
    }
}
