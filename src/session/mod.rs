//! Session layer: the authenticated duplex connection and the
//! pending-request table that correlates responses back to their callers.

mod connection;
pub(crate) mod pending;

pub use connection::{ConnectionSession, SessionOptions, SessionState};
