//! The duplex transport seam.
//!
//! The protocol core never touches a socket directly: it sends and receives
//! [`Frame`]s through the [`TransportSink`] / [`TransportStream`] trait pair.
//! [`ws`] provides the WebSocket implementation used in production;
//! [`MockTransport`] provides an in-memory pair for tests and for embedding
//! the client against custom transports.

mod mock;
pub mod ws;

pub use mock::{MockPeer, MockTransport};

use crate::core::VerdictResult;

use async_trait::async_trait;
use std::fmt::Debug;

/// A frame on the duplex connection.
///
/// The protocol itself lives in text frames; ping/pong exist only for
/// keep-alive and close marks the end of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame carrying one JSON message.
    Text(String),
    /// Keep-alive probe.
    Ping,
    /// Keep-alive reply.
    Pong,
    /// The peer ended the connection.
    Close,
}

/// The outbound half of a duplex transport.
///
/// Implementations must be `Send` so the half can be shared behind an async
/// mutex between caller tasks and the heartbeat task.
#[async_trait]
pub trait TransportSink: Send + Debug {
    /// Sends a text frame.
    async fn send_text(&mut self, text: String) -> VerdictResult<()>;

    /// Sends a keep-alive ping.
    async fn send_ping(&mut self) -> VerdictResult<()>;

    /// Closes the transport. Subsequent sends fail.
    async fn close(&mut self) -> VerdictResult<()>;
}

/// The inbound half of a duplex transport.
#[async_trait]
pub trait TransportStream: Send + Debug {
    /// Receives the next frame.
    ///
    /// Returns `None` once the transport has ended and no further frames
    /// will arrive.
    async fn next_frame(&mut self) -> Option<VerdictResult<Frame>>;
}

/// A boxed outbound transport half.
pub type BoxedSink = Box<dyn TransportSink>;

/// A boxed inbound transport half.
pub type BoxedStream = Box<dyn TransportStream>;
