//! Error types for the verdictwire library.
//!
//! This module provides structured, typed errors for all failure scenarios.
//! The library never panics; all errors are returned as `Result` values.

use std::time::Duration;
use thiserror::Error;

/// The main error type for verdict operations.
///
/// Every error surfaced to a caller is one of these kinds, so callers can
/// match on the kind to decide whether to reconnect, retry, or abort.
#[derive(Debug, Error)]
pub enum VerdictError {
    /// The connection is closed or was never established.
    ///
    /// Terminal for the current session: the caller must reconnect,
    /// not retry in place.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Why the connection is unusable.
        reason: String,
    },

    /// Opening the transport to the verdict service failed.
    #[error("connection failed: {message}")]
    Connection {
        /// Error message describing the failure.
        message: String,
    },

    /// The authentication handshake or token acquisition failed.
    ///
    /// Terminal for the current session.
    #[error("authentication failed: {reason}")]
    Authentication {
        /// Reason for the authentication failure.
        reason: String,
    },

    /// No correlated response arrived within the configured bound.
    ///
    /// Local to the individual request; the session stays usable.
    #[error("no response within {elapsed:?}")]
    Timeout {
        /// How long the caller waited.
        elapsed: Duration,
    },

    /// The file upload was rejected or could not be transferred.
    #[error("upload failed{}: {detail}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Upload {
        /// HTTP status of the upload response, if one was received.
        status: Option<u16>,
        /// Response body or transport error detail.
        detail: String,
    },

    /// The server sent a frame the client cannot interpret.
    #[error("protocol error: {detail}")]
    Protocol {
        /// Details about the unexpected frame or field.
        detail: String,
    },

    /// A caller-supplied argument is malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of what is wrong with the argument.
        message: String,
    },

    /// A request id was registered while an identical one was still in flight.
    ///
    /// This is a programmer error on the caller's side, not a protocol error.
    #[error("request id '{request_id}' is already in flight")]
    DuplicateRequest {
        /// The offending request id.
        request_id: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerdictError {
    /// Returns `true` if this error is terminal for the session.
    ///
    /// Terminal errors require a full reconnect; retrying the operation on
    /// the same session cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. } | Self::Connection { .. } | Self::Authentication { .. }
        )
    }

    /// Returns `true` if this error is local to a single request.
    ///
    /// The session remains usable; only the affected request failed.
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Upload { .. }
                | Self::InvalidArgument { .. }
                | Self::DuplicateRequest { .. }
        )
    }

    /// Creates a `ConnectionClosed` error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a `Connection` error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an `Authentication` error.
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Creates an `Upload` error from an HTTP status and response body.
    pub fn upload(status: u16, detail: impl Into<String>) -> Self {
        Self::Upload {
            status: Some(status),
            detail: detail.into(),
        }
    }

    /// Creates an `Upload` error for a transfer that failed before a status
    /// was received.
    pub fn upload_transport(detail: impl Into<String>) -> Self {
        Self::Upload {
            status: None,
            detail: detail.into(),
        }
    }

    /// Creates a `Protocol` error.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a `DuplicateRequest` error.
    pub fn duplicate_request(request_id: impl Into<String>) -> Self {
        Self::DuplicateRequest {
            request_id: request_id.into(),
        }
    }
}

/// A specialized `Result` type for verdict operations.
pub type VerdictResult<T> = Result<T, VerdictError>;
