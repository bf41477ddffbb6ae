//! Bearer-token acquisition: the [`TokenSource`] capability interface, the
//! serializing [`TokenCache`], and the two OAuth grant types that share it.

mod client_credentials;
mod password;
mod token_cache;
mod token_source;

pub use client_credentials::ClientCredentials;
pub use password::Password;
pub use token_cache::{HttpTokenFetcher, TokenCache, TokenFetcher, TokenResponse};
pub use token_source::TokenSource;
