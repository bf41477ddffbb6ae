//! The capability interface for bearer-token acquisition.

use crate::core::VerdictResult;

use async_trait::async_trait;
use std::fmt::Debug;

/// Anything that can produce a valid bearer token for the handshake.
///
/// The two OAuth grant types shipped with this crate —
/// [`ClientCredentials`](crate::auth::ClientCredentials) and
/// [`Password`](crate::auth::Password) — implement this by composing a
/// shared [`TokenCache`](crate::auth::TokenCache). Custom implementations
/// can plug in any other token scheme.
#[async_trait]
pub trait TokenSource: Send + Sync + Debug {
    /// Returns a token that is currently valid.
    ///
    /// Implementations are expected to cache and to serialize concurrent
    /// callers; a call may therefore suspend behind another caller's
    /// refresh.
    async fn get_token(&self) -> VerdictResult<String>;
}
