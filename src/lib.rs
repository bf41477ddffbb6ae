//! # Verdictwire
//!
//! A client for a remote verdict-as-a-service: submit a file hash, file,
//! byte stream, or URL and receive a malware verdict (`Clean`, `Malicious`,
//! `Pup`, or `Unknown`).
//!
//! ## Overview
//!
//! All requests share one persistent duplex connection. The client:
//!
//! - Multiplexes any number of concurrent verdict requests over the socket
//!   and correlates each asynchronous response back to the caller that
//!   issued it
//! - Authenticates the connection with a bearer token before any request
//!   is sent, acquiring and caching tokens through a rate-limited cache
//! - Keeps the connection alive against idle timeouts with a heartbeat
//! - Transparently uploads file content when a hash is unknown to the
//!   service and waits for the second, final response
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use url::Url;
//! use verdictwire::auth::ClientCredentials;
//! use verdictwire::{ScanOptions, Sha256, VerdictClient};
//!
//! #[tokio::main]
//! async fn main() -> verdictwire::VerdictResult<()> {
//!     let token_url = Url::parse("https://idp.example.com/token").unwrap();
//!     let source = ClientCredentials::new("client-id", "client-secret", token_url)?;
//!
//!     let client = VerdictClient::builder(source)
//!         .endpoint(Url::parse("wss://verdicts.example.com/ws").unwrap())
//!         .build()?;
//!     client.connect().await?;
//!
//!     let sha256: Sha256 =
//!         "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f".parse()?;
//!     let report = client.for_sha256(&sha256, &ScanOptions::default()).await?;
//!     println!("{}", report.verdict);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several layers:
//!
//! - **Core**: errors, verdicts, and SHA-256 identities
//! - **Protocol**: the JSON wire messages
//! - **Transport**: the duplex transport seam (WebSocket in production,
//!   in-memory mock for tests)
//! - **Session**: the authenticated connection, inbound dispatch, and the
//!   pending-request table
//! - **Auth**: token sources and the serializing, throttling token cache
//! - **Client**: the `for_*` operations callers use

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod core;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types at the crate root
pub use crate::client::{ClientConfig, ScanOptions, VerdictClient, VerdictClientBuilder};
pub use crate::core::{Sha256, Verdict, VerdictError, VerdictReport, VerdictResult};
pub use crate::session::{ConnectionSession, SessionOptions, SessionState};

/// Prelude module for convenient imports.
///
/// ```rust
/// use verdictwire::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{ClientCredentials, Password, TokenSource};
    pub use crate::client::{ClientConfig, ScanOptions, VerdictClient, VerdictClientBuilder};
    pub use crate::core::{Sha256, Verdict, VerdictError, VerdictReport, VerdictResult};
    pub use crate::session::{ConnectionSession, SessionOptions, SessionState};
}
