//! OAuth resource-owner-password grant.

use crate::auth::token_cache::{HttpTokenFetcher, TokenCache, TokenFetcher};
use crate::auth::token_source::TokenSource;
use crate::core::VerdictResult;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Token source using the resource-owner-password flow.
///
/// Expects a client id plus the resource owner's username and password.
#[derive(Debug)]
pub struct Password {
    client_id: String,
    username: String,
    password: SecretString,
    cache: TokenCache,
}

impl Password {
    /// Creates a password-grant token source against the given token
    /// endpoint.
    pub fn new(
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        token_url: Url,
    ) -> VerdictResult<Self> {
        let fetcher = HttpTokenFetcher::new(token_url)?;
        Ok(Self::with_fetcher(
            client_id,
            username,
            password,
            Box::new(fetcher),
        ))
    }

    /// Creates a password-grant token source refreshing through a custom
    /// [`TokenFetcher`].
    pub fn with_fetcher(
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        fetcher: Box<dyn TokenFetcher>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            username: username.into(),
            password: SecretString::from(password.into()),
            cache: TokenCache::new(fetcher),
        }
    }
}

#[async_trait]
impl TokenSource for Password {
    async fn get_token(&self) -> VerdictResult<String> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
            ("grant_type", "password"),
        ];
        self.cache.get_token(&form).await
    }
}
