use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

use crate::auth::TokenManager;
use crate::error::ApiError;

/// Exponential backoff: base * 2^attempt, plus up to 10% jitter
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let delay = base.saturating_mul(2_u32.saturating_pow(attempt));
    let jitter = delay.mul_f64(0.1 * rand::random::<f64>());
    delay + jitter
}

/// HTTP client for the Fleet API with bearer auth and retry logic
#[derive(Clone)]
pub struct TeslaHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    token_manager: TokenManager,

    /// Base URL without trailing slash
    base_url: String,

    max_retries: u32,

    /// Base delay for exponential backoff
    retry_delay: Duration,
}

impl TeslaHttpClient {
    pub fn new(
        token_manager: TokenManager,
        base_url: String,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .user_agent(concat!("tesla-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token_manager,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.request_with_retry(Method::GET, path, |req| req.query(query))
            .await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.request_with_retry(Method::POST, path, |req| req.json(body))
            .await
    }

    /// Execute a request with retry logic
    /// - 401: drops the cached token and retries with a fresh one
    /// - 408/429/5xx and transport errors: exponential backoff
    async fn request_with_retry<F>(
        &self,
        method: Method,
        path: &str,
        build: F,
    ) -> Result<Value, ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let token = self.token_manager.get_valid_token().await?;

            tracing::debug!(
                method = %method,
                url = %url,
                attempt = attempt + 1,
                "Sending Fleet API request"
            );

            let request = build(self.client.request(method.clone(), &url)).bearer_auth(&token);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        tracing::debug!(status = %status, "Request successful");
                        return response.json::<Value>().await.map_err(|e| {
                            ApiError::Internal(anyhow::anyhow!(
                                "Fleet API returned invalid JSON for {}: {}",
                                url,
                                e
                            ))
                        });
                    }

                    tracing::warn!(status = %status, url = %url, "Received error response");

                    match status.as_u16() {
                        401 if attempt < self.max_retries => {
                            tracing::warn!("Received 401, refreshing token and retrying...");
                            self.token_manager.invalidate().await;
                            attempt += 1;
                            continue;
                        }
                        408 | 429 | 500..=599 if attempt < self.max_retries => {
                            let delay = backoff_delay(self.retry_delay, attempt);
                            tracing::warn!(
                                "Received {}, retrying after {}ms (attempt {}/{})",
                                status,
                                delay.as_millis(),
                                attempt + 1,
                                self.max_retries
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        _ => {}
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    tracing::error!(
                        status = status.as_u16(),
                        url = %url,
                        response_body = %error_text,
                        attempt = attempt + 1,
                        "Fleet API request failed"
                    );

                    if status.as_u16() == 401 {
                        return Err(ApiError::Auth(format!(
                            "Fleet API rejected access token: {}",
                            error_text
                        )));
                    }
                    return Err(ApiError::TeslaApi {
                        status: status.as_u16(),
                        message: error_text,
                    });
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else {
                        "unknown"
                    };

                    tracing::warn!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        attempt = attempt + 1,
                        "HTTP request error"
                    );

                    if attempt < self.max_retries {
                        let delay = backoff_delay(self.retry_delay, attempt);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error_kind = error_kind,
                        url = %url,
                        total_attempts = attempt + 1,
                        "HTTP request failed after all retries"
                    );

                    return Err(ApiError::Unavailable(format!(
                        "Fleet API request failed: {} (kind: {})",
                        e, error_kind
                    )));
                }
            }
        }
    }
}
