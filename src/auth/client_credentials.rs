//! OAuth client-credentials grant.

use crate::auth::token_cache::{HttpTokenFetcher, TokenCache, TokenFetcher};
use crate::auth::token_source::TokenSource;
use crate::core::VerdictResult;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Token source using the client-credentials flow.
///
/// Expects a client id and a client secret registered with the identity
/// provider.
///
/// # Examples
///
/// ```rust,no_run
/// use url::Url;
/// use verdictwire::auth::ClientCredentials;
///
/// # fn main() -> verdictwire::VerdictResult<()> {
/// let token_url = Url::parse("https://idp.example.com/token").unwrap();
/// let source = ClientCredentials::new("my-client", "my-secret", token_url)?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: SecretString,
    cache: TokenCache,
}

impl ClientCredentials {
    /// Creates a client-credentials token source against the given token
    /// endpoint.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: Url,
    ) -> VerdictResult<Self> {
        let fetcher = HttpTokenFetcher::new(token_url)?;
        Ok(Self::with_fetcher(client_id, client_secret, Box::new(fetcher)))
    }

    /// Creates a client-credentials token source refreshing through a
    /// custom [`TokenFetcher`].
    pub fn with_fetcher(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        fetcher: Box<dyn TokenFetcher>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            cache: TokenCache::new(fetcher),
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn get_token(&self) -> VerdictResult<String> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("grant_type", "client_credentials"),
        ];
        self.cache.get_token(&form).await
    }
}
