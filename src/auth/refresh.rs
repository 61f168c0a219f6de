// Token endpoint exchange

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::error::AuthError;
use super::types::{Grant, TokenResponse};

/// Something that can trade a grant for a token response.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self, grant: &Grant) -> Result<TokenResponse, AuthError>;
}

/// Vendor OAuth2 token endpoint over HTTPS (form-encoded POST)
pub struct OAuthTokenEndpoint {
    client: Client,
    url: String,
    scope: String,
    audience: String,
}

impl OAuthTokenEndpoint {
    pub fn new(url: String, scope: String, audience: String, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tesla-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url,
            scope,
            audience,
        })
    }

    fn form<'a>(&'a self, grant: &'a Grant) -> Vec<(&'static str, &'a str)> {
        let mut form = vec![("grant_type", grant.grant_type())];
        match grant {
            Grant::RefreshToken {
                refresh_token,
                client_id,
            } => {
                if let Some(client_id) = client_id {
                    form.push(("client_id", client_id.as_str()));
                }
                form.push(("refresh_token", refresh_token.as_str()));
            }
            Grant::ClientCredentials(credential) => {
                form.push(("client_id", credential.client_id.as_str()));
                form.push(("client_secret", credential.client_secret.as_str()));
                form.push(("scope", self.scope.as_str()));
                form.push(("audience", self.audience.as_str()));
            }
        }
        form
    }
}

#[async_trait]
impl TokenEndpoint for OAuthTokenEndpoint {
    async fn exchange(&self, grant: &Grant) -> Result<TokenResponse, AuthError> {
        tracing::info!(grant_type = grant.grant_type(), "Requesting access token...");

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .form(&self.form(grant))
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else {
                    "request_error"
                };
                tracing::warn!(error_kind = kind, error = %e, "Token request failed");
                AuthError::TransientNetwork(format!("{} ({})", e, kind))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                "Token endpoint returned error: status={}, body={}",
                status,
                error_text
            );

            // OAuth error bodies carry `error` / `error_description`
            let detail = serde_json::from_str::<serde_json::Value>(&error_text)
                .ok()
                .and_then(|json| {
                    let code = json.get("error")?.as_str()?.to_string();
                    let description = json
                        .get("error_description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    Some(format!("{} {}", code, description).trim().to_string())
                })
                .unwrap_or(error_text);

            let message = format!("token endpoint returned {}: {}", status, detail);
            return Err(match status.as_u16() {
                408 | 429 | 500..=599 => AuthError::TransientNetwork(message),
                _ => AuthError::Authentication(message),
            });
        }

        let data: TokenResponse = response.json().await.map_err(|e| {
            AuthError::Authentication(format!("malformed token response: {}", e))
        })?;

        tracing::info!(
            "Access token received (expires_in={:?}, rotated_refresh_token={})",
            data.expires_in,
            data.refresh_token.is_some()
        );

        Ok(data)
    }
}
