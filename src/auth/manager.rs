use anyhow::Context;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::credentials::{self, RefreshTokenStore};
use super::error::AuthError;
use super::refresh::{OAuthTokenEndpoint, TokenEndpoint};
use super::types::{Credential, Grant, TokenState};
use crate::config::Config;
use crate::http_client::backoff_delay;

/// A refresh in flight, awaited by every caller that found the cache stale.
type PendingRefresh = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// Tuning for the token lifecycle
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Tokens expiring within this window are treated as already expired
    pub safety_margin: Duration,

    /// Upper bound for a single token endpoint call
    pub exchange_timeout: Duration,

    /// Retries for transient exchange failures
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    pub retry_base_delay: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60),
            exchange_timeout: Duration::from_secs(15),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// Token manager
/// Hands out valid access tokens, refreshing them at most once at a time
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Arc<dyn TokenEndpoint>,

    /// Client credential, if one was configured
    credential: Option<Credential>,

    /// Where rotated refresh tokens are persisted
    store: RefreshTokenStore,

    /// Current refresh token; only touched by the refresh task
    refresh_token: Mutex<Option<String>>,

    /// Cached access token
    state: RwLock<Option<TokenState>>,

    /// Refresh currently in flight, if any
    pending: Mutex<Option<PendingRefresh>>,

    settings: TokenSettings,
}

impl TokenManager {
    /// Create a manager around an explicit endpoint.
    ///
    /// Reads the persisted refresh token once; a file that exists but cannot
    /// be read is a configuration error.
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        credential: Option<Credential>,
        store: RefreshTokenStore,
        settings: TokenSettings,
    ) -> Result<Self, AuthError> {
        let refresh_token = store.load()?;

        if credential.is_none() && refresh_token.is_none() {
            tracing::warn!(
                "No client credentials or refresh token found ({}); token requests will fail",
                store.path().display()
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                credential,
                store,
                refresh_token: Mutex::new(refresh_token),
                state: RwLock::new(None),
                pending: Mutex::new(None),
                settings,
            }),
        })
    }

    /// Build the manager from configuration: decrypt credentials, load the
    /// refresh token and point at the vendor token endpoint.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let credential = credentials::resolve_credential(
            &config.credentials_file,
            config.encryption_key.as_deref(),
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
        )?;

        let endpoint = OAuthTokenEndpoint::new(
            config.auth_url.clone(),
            config.scopes.clone(),
            config.api_base_url.clone(),
            config.token_exchange_timeout(),
        )
        .context("Failed to create token endpoint client")?;

        let settings = TokenSettings {
            safety_margin: Duration::from_secs(config.token_safety_margin),
            exchange_timeout: config.token_exchange_timeout(),
            max_retries: config.token_max_retries,
            ..TokenSettings::default()
        };

        Ok(Self::new(
            Arc::new(endpoint),
            credential,
            RefreshTokenStore::new(config.refresh_token_file.clone()),
            settings,
        )?)
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// Concurrent callers that find the cache stale share one refresh and
    /// all observe its result. Dropping a caller does not cancel the refresh.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.inner.cached_token().await {
            return Ok(token);
        }

        let pending = {
            let mut pending = self.inner.pending.lock().await;

            // Another caller may have finished a refresh while we waited
            if let Some(token) = self.inner.cached_token().await {
                return Ok(token);
            }

            match pending.as_ref() {
                Some(refresh) => {
                    tracing::debug!("Joining token refresh already in flight");
                    refresh.clone()
                }
                None => {
                    let refresh = Inner::spawn_refresh(self.inner.clone());
                    *pending = Some(refresh.clone());
                    refresh
                }
            }
        };

        pending.await
    }

    /// Drop the cached access token so the next call refreshes.
    pub async fn invalidate(&self) {
        tracing::info!("Invalidating cached access token");
        *self.inner.state.write().await = None;
    }

    /// Whether a fresh token is currently cached
    pub async fn has_valid_token(&self) -> bool {
        self.inner.cached_token().await.is_some()
    }

    /// Manager whose endpoint always issues `access_token` (for testing only)
    #[cfg(test)]
    pub fn new_for_testing(access_token: &str) -> Self {
        let store = RefreshTokenStore::new(std::env::temp_dir().join(format!(
            "tesla-mcp-test-{}",
            uuid::Uuid::new_v4()
        )));
        let credential = Credential {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
        };
        Self::new(
            Arc::new(StaticEndpoint(access_token.to_string())),
            Some(credential),
            store,
            TokenSettings::default(),
        )
        .unwrap()
    }
}

#[cfg(test)]
struct StaticEndpoint(String);

#[cfg(test)]
#[async_trait::async_trait]
impl TokenEndpoint for StaticEndpoint {
    async fn exchange(&self, _grant: &Grant) -> Result<super::types::TokenResponse, AuthError> {
        Ok(super::types::TokenResponse {
            access_token: self.0.clone(),
            expires_in: Some(3600),
            ..Default::default()
        })
    }
}

impl Inner {
    async fn cached_token(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .as_ref()
            .filter(|s| s.is_fresh_at(Instant::now(), self.settings.safety_margin))
            .map(|s| s.access_token.clone())
    }

    /// Run the refresh on its own task so cancelling any one waiter leaves it
    /// running for the others.
    ///
    /// `pending` is cleared on every exit, including a task that panicked,
    /// so the next caller starts a fresh exchange.
    fn spawn_refresh(inner: Arc<Inner>) -> PendingRefresh {
        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            let result = task_inner.refresh().await;
            task_inner.pending.lock().await.take();
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Token refresh task failed: {}", e);
                    // The task never reached its own cleanup
                    inner.pending.lock().await.take();
                    *inner.state.write().await = None;
                    Err(AuthError::Authentication(format!(
                        "token refresh task failed: {}",
                        e
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        let mut refresh_token = self.refresh_token.lock().await;

        let grant = match (refresh_token.as_ref(), self.credential.as_ref()) {
            (Some(token), credential) => Grant::RefreshToken {
                refresh_token: token.clone(),
                client_id: credential.map(|c| c.client_id.clone()),
            },
            (None, Some(credential)) => Grant::ClientCredentials(credential.clone()),
            (None, None) => {
                return Err(AuthError::Configuration(format!(
                    "no refresh token at {} and no client credentials configured",
                    self.store.path().display()
                )))
            }
        };

        let result = self
            .exchange_with_retry(&grant)
            .await
            .and_then(|response| TokenState::from_response(&response, Instant::now()));

        let state = match result {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                *self.state.write().await = None;
                return Err(e);
            }
        };

        // Persist before anyone sees the new token
        if let Some(ref rotated) = state.refresh_token {
            if refresh_token.as_deref() != Some(rotated.as_str()) {
                if let Err(e) = self.store.save(rotated).await {
                    tracing::error!(
                        "Failed to persist rotated refresh token to {}: {}",
                        self.store.path().display(),
                        e
                    );
                }
                *refresh_token = Some(rotated.clone());
            }
        }

        let access_token = state.access_token.clone();
        tracing::info!(
            "Access token refreshed ({}...)",
            access_token.chars().take(8).collect::<String>()
        );
        *self.state.write().await = Some(state);

        Ok(access_token)
    }

    async fn exchange_with_retry(
        &self,
        grant: &Grant,
    ) -> Result<super::types::TokenResponse, AuthError> {
        let max_retries = self.settings.max_retries;
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(
                self.settings.exchange_timeout,
                self.endpoint.exchange(grant),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AuthError::TransientNetwork(format!(
                    "token exchange timed out after {:?}",
                    self.settings.exchange_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < max_retries => {
                    let delay = backoff_delay(self.settings.retry_base_delay, attempt);
                    tracing::warn!(
                        "{}, retrying after {}ms (attempt {}/{})",
                        e,
                        delay.as_millis(),
                        attempt + 1,
                        max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AuthError::TransientNetwork(msg)) => {
                    return Err(AuthError::Authentication(format!(
                        "token endpoint unreachable after {} attempts: {}",
                        attempt + 1,
                        msg
                    )));
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::TokenResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted token endpoint that counts calls and records grants
    struct FakeEndpoint {
        calls: AtomicUsize,
        grants: std::sync::Mutex<Vec<Grant>>,
        responses: std::sync::Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
        delay: Duration,
    }

    impl FakeEndpoint {
        fn new(responses: Vec<Result<TokenResponse, AuthError>>) -> Arc<Self> {
            Self::with_delay(responses, Duration::ZERO)
        }

        fn with_delay(
            responses: Vec<Result<TokenResponse, AuthError>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                grants: std::sync::Mutex::new(Vec::new()),
                responses: std::sync::Mutex::new(responses.into()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn grants(&self) -> Vec<Grant> {
            self.grants.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn exchange(&self, grant: &Grant) -> Result<TokenResponse, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.grants.lock().unwrap().push(grant.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AuthError::Authentication("no scripted response".into())))
        }
    }

    fn token(access_token: &str, expires_in: i64, refresh_token: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: access_token.to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(expires_in),
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    fn credential() -> Credential {
        Credential {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn settings() -> TokenSettings {
        TokenSettings {
            safety_margin: Duration::from_secs(60),
            exchange_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    fn store_with(dir: &tempfile::TempDir, refresh_token: Option<&str>) -> RefreshTokenStore {
        let path = dir.path().join("refresh_token");
        if let Some(token) = refresh_token {
            std::fs::write(&path, token).unwrap();
        }
        RefreshTokenStore::new(path)
    }

    #[tokio::test]
    async fn test_no_credentials_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![]);
        let manager =
            TokenManager::new(endpoint.clone(), None, store_with(&dir, None), settings()).unwrap();

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![Ok(token("abc", 3600, None))]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        assert_eq!(manager.get_valid_token().await.unwrap(), "abc");
        assert_eq!(manager.get_valid_token().await.unwrap(), "abc");
        assert_eq!(manager.get_valid_token().await.unwrap(), "abc");
        assert_eq!(endpoint.calls(), 1);
        assert!(manager.has_valid_token().await);
    }

    #[tokio::test]
    async fn test_refresh_token_grant_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![Ok(token("abc", 3600, None))]);
        let manager = TokenManager::new(
            endpoint.clone(),
            Some(credential()),
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        manager.get_valid_token().await.unwrap();
        assert_eq!(
            endpoint.grants(),
            vec![Grant::RefreshToken {
                refresh_token: "rt-1".to_string(),
                client_id: Some("client".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_client_credentials_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![Ok(token("cc", 3600, None))]);
        let manager = TokenManager::new(
            endpoint.clone(),
            Some(credential()),
            store_with(&dir, None),
            settings(),
        )
        .unwrap();

        assert_eq!(manager.get_valid_token().await.unwrap(), "cc");
        assert_eq!(endpoint.grants(), vec![Grant::ClientCredentials(credential())]);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::with_delay(
            vec![Ok(token("shared", 3600, None))],
            Duration::from_millis(50),
        );
        let manager = TokenManager::new(
            endpoint.clone(),
            Some(credential()),
            store_with(&dir, None),
            settings(),
        )
        .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_valid_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::with_delay(
            vec![Err(AuthError::Authentication("401 Unauthorized".into()))],
            Duration::from_millis(50),
        );
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        let results = futures::future::join_all(
            (0..8).map(|_| {
                let manager = manager.clone();
                async move { manager.get_valid_token().await }
            }),
        )
        .await;

        let expected = AuthError::Authentication("401 Unauthorized".into());
        for result in results {
            assert_eq!(result.unwrap_err(), expected);
        }
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_no_state_and_next_call_retries() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![
            Err(AuthError::Authentication("401 Unauthorized".into())),
            Ok(token("second", 3600, None)),
        ]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        assert!(manager.get_valid_token().await.is_err());
        assert!(!manager.has_valid_token().await);

        assert_eq!(manager.get_valid_token().await.unwrap(), "second");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_negative_expiry_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![
            Ok(token("bad", -5, None)),
            Ok(token("good", 3600, None)),
        ]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication(_)));
        assert!(!manager.has_valid_token().await);

        assert_eq!(manager.get_valid_token().await.unwrap(), "good");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_token_inside_safety_margin_triggers_refresh() {
        let dir = tempfile::tempdir().unwrap();
        // 30s lifetime is inside the 60s margin, so it is stale on arrival
        let endpoint = FakeEndpoint::new(vec![
            Ok(token("short", 30, None)),
            Ok(token("long", 3600, None)),
        ]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        assert_eq!(manager.get_valid_token().await.unwrap(), "short");
        assert_eq!(manager.get_valid_token().await.unwrap(), "long");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted_and_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, Some("rt-1"));
        let endpoint = FakeEndpoint::new(vec![
            Ok(token("first", 3600, Some("rt-2"))),
            Ok(token("second", 3600, Some("rt-3"))),
        ]);
        let manager =
            TokenManager::new(endpoint.clone(), None, store.clone(), settings()).unwrap();

        assert_eq!(manager.get_valid_token().await.unwrap(), "first");
        assert_eq!(store.load().unwrap().as_deref(), Some("rt-2"));

        manager.invalidate().await;
        assert_eq!(manager.get_valid_token().await.unwrap(), "second");
        assert_eq!(store.load().unwrap().as_deref(), Some("rt-3"));

        let grants = endpoint.grants();
        assert_eq!(
            grants[1],
            Grant::RefreshToken {
                refresh_token: "rt-2".to_string(),
                client_id: None,
            }
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![
            Err(AuthError::TransientNetwork("connection reset".into())),
            Err(AuthError::TransientNetwork("connection reset".into())),
            Ok(token("abc", 3600, None)),
        ]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        assert_eq!(manager.get_valid_token().await.unwrap(), "abc");
        assert_eq!(endpoint.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![
            Err(AuthError::TransientNetwork("timeout".into())),
            Err(AuthError::TransientNetwork("timeout".into())),
            Err(AuthError::TransientNetwork("timeout".into())),
        ]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication(ref m) if m.contains("3 attempts")));
        assert_eq!(endpoint.calls(), 3);
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint =
            FakeEndpoint::with_delay(vec![Ok(token("late", 3600, None))], Duration::from_secs(5));
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            TokenSettings {
                exchange_timeout: Duration::from_millis(20),
                max_retries: 0,
                ..settings()
            },
        )
        .unwrap();

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::with_delay(
            vec![Ok(token("survivor", 3600, None))],
            Duration::from_millis(100),
        );
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        // First caller starts the refresh and is abandoned
        let abandoned = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_token().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();

        assert_eq!(manager.get_valid_token().await.unwrap(), "survivor");
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_refresh_token_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file cannot be read as text
        let path = dir.path().join("refresh_token");
        std::fs::create_dir(&path).unwrap();

        let result = TokenManager::new(
            FakeEndpoint::new(vec![]),
            None,
            RefreshTokenStore::new(path),
            settings(),
        );
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_fails_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = FakeEndpoint::new(vec![
            Ok(token("huge", i64::MAX, None)),
            Ok(token("normal", 3600, None)),
        ]);
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication(ref m) if m.contains("expires_in")));
        assert!(!manager.has_valid_token().await);

        assert_eq!(manager.get_valid_token().await.unwrap(), "normal");
        assert_eq!(endpoint.calls(), 2);
    }

    /// Panics on the first exchange, then issues tokens normally
    struct PanicOnceEndpoint {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenEndpoint for PanicOnceEndpoint {
        async fn exchange(&self, _grant: &Grant) -> Result<TokenResponse, AuthError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("endpoint blew up");
            }
            Ok(token("recovered", 3600, None))
        }
    }

    #[tokio::test]
    async fn test_panicked_refresh_task_does_not_wedge_manager() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Arc::new(PanicOnceEndpoint {
            calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::new(
            endpoint.clone(),
            None,
            store_with(&dir, Some("rt-1")),
            settings(),
        )
        .unwrap();

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication(ref m) if m.contains("task failed")));

        assert_eq!(manager.get_valid_token().await.unwrap(), "recovered");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rotated_token_kept_when_persist_fails() {
        let dir = tempfile::tempdir().unwrap();
        // Parent does not exist yet, so loading finds no refresh token
        let blocked = dir.path().join("blocked");
        let store = RefreshTokenStore::new(blocked.join("refresh_token"));
        let endpoint = FakeEndpoint::new(vec![
            Ok(token("first", 3600, Some("rt-2"))),
            Ok(token("second", 3600, None)),
        ]);
        let manager =
            TokenManager::new(endpoint.clone(), Some(credential()), store, settings()).unwrap();

        // A regular file where the parent directory should be makes save fail
        std::fs::write(&blocked, "not a directory").unwrap();

        assert_eq!(manager.get_valid_token().await.unwrap(), "first");
        assert!(manager.has_valid_token().await);

        manager.invalidate().await;
        assert_eq!(manager.get_valid_token().await.unwrap(), "second");

        let grants = endpoint.grants();
        assert_eq!(grants[0], Grant::ClientCredentials(credential()));
        assert_eq!(
            grants[1],
            Grant::RefreshToken {
                refresh_token: "rt-2".to_string(),
                client_id: Some("client".to_string()),
            }
        );
    }
}
