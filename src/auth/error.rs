// Authentication error taxonomy

use thiserror::Error;

/// Failures surfaced by the token manager.
///
/// `Clone` because a single refresh outcome is handed to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Missing or unreadable credential material. Not retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The vendor rejected the exchange, or it could not be completed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Timeout or connection failure talking to the token endpoint.
    #[error("Token endpoint unavailable: {0}")]
    TransientNetwork(String),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::TransientNetwork(_))
    }
}
