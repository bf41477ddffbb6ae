//! In-memory transport for testing.
//!
//! [`MockTransport::pair`] creates the two client-side halves plus a
//! [`MockPeer`] that plays the server: it observes every frame the client
//! sends and injects the frames the client receives. This makes the whole
//! protocol core testable with a scripted peer and no network.

use crate::core::{VerdictError, VerdictResult};
use crate::transport::{BoxedSink, BoxedStream, Frame, TransportSink, TransportStream};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Factory for in-memory transport pairs.
///
/// # Examples
///
/// ```rust
/// use verdictwire::transport::{Frame, MockTransport, TransportSink};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (mut sink, _stream, mut peer) = MockTransport::pair();
/// sink.send_text("{\"kind\":\"AuthRequest\"}".to_string()).await.unwrap();
/// assert!(matches!(peer.recv().await, Some(Frame::Text(_))));
/// # }
/// ```
#[derive(Debug)]
pub struct MockTransport;

impl MockTransport {
    /// Creates the client-side halves and the peer handle driving them.
    pub fn pair() -> (BoxedSink, BoxedStream, MockPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Box::new(MockSink {
                tx: outbound_tx,
                closed: false,
            }),
            Box::new(MockStream { rx: inbound_rx }),
            MockPeer {
                outbound_rx,
                inbound_tx,
            },
        )
    }
}

/// The scripted remote end of a [`MockTransport`] pair.
#[derive(Debug)]
pub struct MockPeer {
    outbound_rx: mpsc::UnboundedReceiver<Frame>,
    inbound_tx: mpsc::UnboundedSender<Frame>,
}

impl MockPeer {
    /// Receives the next frame the client sent, or `None` once the client
    /// side has been dropped or closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound_rx.recv().await
    }

    /// Receives the next *text* frame the client sent, skipping pings.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Ping | Frame::Pong => continue,
                Frame::Close => return None,
            }
        }
    }

    /// Delivers a frame to the client. Returns `false` if the client side
    /// is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.inbound_tx.send(frame).is_ok()
    }

    /// Delivers a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Delivers a close frame to the client.
    pub fn close(&self) -> bool {
        self.send(Frame::Close)
    }
}

#[derive(Debug)]
struct MockSink {
    tx: mpsc::UnboundedSender<Frame>,
    closed: bool,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: String) -> VerdictResult<()> {
        if self.closed {
            return Err(VerdictError::connection_closed("mock transport closed"));
        }
        self.tx
            .send(Frame::Text(text))
            .map_err(|_| VerdictError::connection_closed("mock peer gone"))
    }

    async fn send_ping(&mut self) -> VerdictResult<()> {
        if self.closed {
            return Err(VerdictError::connection_closed("mock transport closed"));
        }
        self.tx
            .send(Frame::Ping)
            .map_err(|_| VerdictError::connection_closed("mock peer gone"))
    }

    async fn close(&mut self) -> VerdictResult<()> {
        self.closed = true;
        // Best effort: the peer may already be gone.
        let _ = self.tx.send(Frame::Close);
        Ok(())
    }
}

#[derive(Debug)]
struct MockStream {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl TransportStream for MockStream {
    async fn next_frame(&mut self) -> Option<VerdictResult<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}
