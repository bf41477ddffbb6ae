//! Bearer-token caching and request throttling.
//!
//! All callers of [`TokenCache::get_token`] serialize through one async
//! mutex, which yields read-through-cache semantics with at most one
//! refresh in flight: whoever holds the lock refreshes, everyone queued
//! behind it observes the refreshed state. Requests to the identity
//! provider are additionally spaced at least one second apart, no matter
//! how bursty the callers are.

use crate::core::{VerdictError, VerdictResult};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Minimum spacing between two requests to the identity provider.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// A successful answer from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The bearer token.
    pub access_token: String,
    /// Validity in seconds from now.
    pub expires_in: u64,
}

/// The outbound call to the token endpoint, kept behind a seam so the cache
/// logic is testable without a network.
#[async_trait]
pub trait TokenFetcher: Send + Sync + Debug {
    /// Performs one token request with the given form-encoded grant
    /// parameters.
    async fn fetch(&self, form: &[(&str, &str)]) -> VerdictResult<TokenResponse>;
}

/// [`TokenFetcher`] that POSTs to an OAuth token endpoint.
#[derive(Debug)]
pub struct HttpTokenFetcher {
    client: reqwest::Client,
    token_url: Url,
}

impl HttpTokenFetcher {
    /// Creates a fetcher for the given token endpoint.
    pub fn new(token_url: Url) -> VerdictResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                VerdictError::invalid_argument(format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self { client, token_url })
    }
}

#[async_trait]
impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self, form: &[(&str, &str)]) -> VerdictResult<TokenResponse> {
        let response = self
            .client
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| {
                VerdictError::authentication(format!("identity provider unreachable: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerdictError::authentication(format!(
                "identity provider returned status {status}: {body}"
            )));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            VerdictError::authentication(format!("malformed token response: {e}"))
        })
    }
}

#[derive(Debug)]
struct CachedToken {
    access_token: SecretString,
    valid_until: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    token: Option<CachedToken>,
    last_request: Option<Instant>,
}

/// Serializing, throttling cache in front of a [`TokenFetcher`].
///
/// The cached token is replaced wholesale on each successful refresh and is
/// only handed out strictly before its expiry. Failures are never cached.
#[derive(Debug)]
pub struct TokenCache {
    fetcher: Box<dyn TokenFetcher>,
    state: tokio::sync::Mutex<CacheState>,
}

impl TokenCache {
    /// Creates a cache refreshing through `fetcher`.
    pub fn new(fetcher: Box<dyn TokenFetcher>) -> Self {
        Self {
            fetcher,
            state: tokio::sync::Mutex::new(CacheState::default()),
        }
    }

    /// Returns a currently-valid token, refreshing it if needed.
    ///
    /// Callers serialize through the internal lock; only the lock holder
    /// ever talks to the identity provider.
    pub async fn get_token(&self, form: &[(&str, &str)]) -> VerdictResult<String> {
        let mut state = self.state.lock().await;

        if let Some(cached) = &state.token {
            if Instant::now() < cached.valid_until {
                return Ok(cached.access_token.expose_secret().to_string());
            }
        }

        // Throttle: at most one request to the provider per interval, even
        // under bursty concurrent callers.
        if let Some(last_request) = state.last_request {
            let since = Instant::now().duration_since(last_request);
            if since < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - since).await;
            }
        }

        state.last_request = Some(Instant::now());
        let response = self.fetcher.fetch(form).await?;

        let valid_until = Instant::now() + Duration::from_secs(response.expires_in);
        tracing::debug!(expires_in = response.expires_in, "token refreshed");
        state.token = Some(CachedToken {
            access_token: SecretString::from(response.access_token.clone()),
            valid_until,
        });
        Ok(response.access_token)
    }
}
