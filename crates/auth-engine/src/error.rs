//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid state transition requested of the state manager
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// An action was invoked before the state it depends on was reached
    #[error("Not ready: {0}")]
    NotReady(String),

    /// The identity provider, LIFF, or phone SDK reported a failure
    #[error("SDK error: {0}")]
    Sdk(String),

    /// Custom-token exchange rejected by the backend
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// Backend request failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Phone verification failed (wrong code, expired challenge, quota)
    #[error("Phone verification failed: {0}")]
    PhoneVerification(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] auth_storage::StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] auth_config_and_utils::CoreError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
