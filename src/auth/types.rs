// Authentication types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::error::AuthError;

/// Client id/secret pair for the client-credentials grant
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// OAuth2 grant sent to the token endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    RefreshToken {
        refresh_token: String,
        client_id: Option<String>,
    },
    ClientCredentials(Credential),
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::RefreshToken { .. } => "refresh_token",
            Grant::ClientCredentials(_) => "client_credentials",
        }
    }
}

/// Token endpoint response body
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
}

/// Cached access token with its expiry on the monotonic clock
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub expires_at: Instant,
    pub refresh_token: Option<String>,
}

impl TokenState {
    /// Build cache state from a token response received at `now`.
    ///
    /// A missing access token or a lifetime that is absent, zero or negative
    /// makes the response malformed; nothing is cached in that case.
    pub fn from_response(response: &TokenResponse, now: Instant) -> Result<Self, AuthError> {
        if response.access_token.is_empty() {
            return Err(AuthError::Authentication(
                "malformed token response: missing access_token".to_string(),
            ));
        }

        let expires_in = match response.expires_in {
            Some(secs) if secs > 0 => secs as u64,
            Some(secs) => {
                return Err(AuthError::Authentication(format!(
                    "malformed token response: expires_in={}",
                    secs
                )))
            }
            None => {
                return Err(AuthError::Authentication(
                    "malformed token response: missing expires_in".to_string(),
                ))
            }
        };

        let expires_at = now
            .checked_add(Duration::from_secs(expires_in))
            .ok_or_else(|| {
                AuthError::Authentication(format!(
                    "malformed token response: expires_in={}",
                    expires_in
                ))
            })?;

        Ok(Self {
            access_token: response.access_token.clone(),
            expires_at,
            refresh_token: response.refresh_token.clone(),
        })
    }

    /// A token counts as fresh only while `now + margin` is still before expiry.
    pub fn is_fresh_at(&self, now: Instant, margin: Duration) -> bool {
        now.checked_add(margin)
            .map_or(false, |deadline| deadline < self.expires_at)
    }
}
