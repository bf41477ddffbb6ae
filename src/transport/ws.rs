//! WebSocket transport backed by tokio-tungstenite.

use crate::core::{VerdictError, VerdictResult};
use crate::transport::{BoxedSink, BoxedStream, Frame, TransportSink, TransportStream};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket connection to `url` and returns its two halves.
///
/// Blocks until the handshake completes or fails.
pub async fn connect(url: &Url) -> VerdictResult<(BoxedSink, BoxedStream)> {
    let (connection, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| VerdictError::connection(e.to_string()))?;
    let (sink, stream) = connection.split();
    Ok((
        Box::new(WsSink { inner: sink }),
        Box::new(WsStream { inner: stream }),
    ))
}

/// Outbound half of a WebSocket connection.
#[derive(Debug)]
pub struct WsSink {
    inner: SplitSink<WsConnection, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: String) -> VerdictResult<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| VerdictError::connection_closed(e.to_string()))
    }

    async fn send_ping(&mut self) -> VerdictResult<()> {
        self.inner
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| VerdictError::connection_closed(e.to_string()))
    }

    async fn close(&mut self) -> VerdictResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| VerdictError::connection_closed(e.to_string()))
    }
}

/// Inbound half of a WebSocket connection.
#[derive(Debug)]
pub struct WsStream {
    inner: SplitStream<WsConnection>,
}

#[async_trait]
impl TransportStream for WsStream {
    async fn next_frame(&mut self) -> Option<VerdictResult<Frame>> {
        let message = self.inner.next().await?;
        Some(match message {
            Ok(Message::Text(text)) => Ok(Frame::Text(text)),
            Ok(Message::Ping(_)) => Ok(Frame::Ping),
            Ok(Message::Pong(_)) => Ok(Frame::Pong),
            Ok(Message::Close(_)) => Ok(Frame::Close),
            Ok(other) => Err(VerdictError::protocol(format!(
                "unexpected non-text frame: {other:?}"
            ))),
            Err(e) => Err(VerdictError::connection_closed(e.to_string())),
        })
    }
}
