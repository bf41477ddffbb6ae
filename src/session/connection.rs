//! The connection session: one authenticated duplex conversation with the
//! verdict service.
//!
//! A session owns the transport halves, runs the authentication handshake,
//! dispatches inbound frames to the pending-request table, and keeps the
//! connection alive with a periodic ping. Two background tasks exist for the
//! session's lifetime — the inbound dispatcher and the heartbeat — and both
//! are stopped and joined on [`ConnectionSession::close`], so no session
//! work ever outlives the session.

use crate::core::{VerdictError, VerdictResult};
use crate::protocol::{AuthRequest, AuthResponse, ErrorMessage, InboundMessage};
use crate::session::pending::PendingRequests;
use crate::transport::{self, BoxedSink, BoxedStream, Frame};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use url::Url;

/// Lifecycle state of a session.
///
/// Verdict traffic is only permitted in `Authenticated`; `Closed` is
/// reachable from every other state. A session cannot be re-authenticated:
/// once the handshake has failed or the connection has closed, the caller
/// must reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No connection exists.
    Disconnected,
    /// The transport is being opened.
    Connecting,
    /// The transport is open; the handshake has not run yet.
    Connected,
    /// The handshake is in flight (or has failed, leaving the session
    /// unusable for verdict traffic).
    Authenticating,
    /// The handshake succeeded; verdict traffic is permitted.
    Authenticated {
        /// The server-assigned session id carried on every request.
        session_id: String,
    },
    /// The connection is gone; every operation fails.
    Closed,
}

/// Tuning knobs for a connection session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Whether to run the keep-alive heartbeat.
    pub keep_alive: bool,

    /// Interval between keep-alive pings.
    pub keep_alive_interval: Duration,

    /// How long to wait for the authentication handshake to complete.
    pub auth_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            keep_alive_interval: Duration::from_secs(20),
            auth_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the keep-alive heartbeat.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the interval between keep-alive pings.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the handshake timeout.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

/// State shared between the session handle and its background tasks.
///
/// The tasks hold this instead of the session itself so that dropping the
/// session handle actually drops it.
#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    pending: PendingRequests,
    auth_waiter: Mutex<Option<oneshot::Sender<AuthResponse>>>,
    last_error: Mutex<Option<ErrorMessage>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_auth_waiter(&self) -> Option<oneshot::Sender<AuthResponse>> {
        self.auth_waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Marks the session closed and fails everything still waiting on it.
    /// Safe to call more than once.
    fn shutdown<F>(&self, cause: F)
    where
        F: Fn() -> VerdictError,
    {
        *self.lock_state() = SessionState::Closed;
        self.pending.fail_all(cause);
        // Dropping the sender makes a blocked authenticate() observe the
        // closed connection.
        drop(self.take_auth_waiter());
    }
}

/// One duplex conversation with the verdict service.
///
/// Created via [`ConnectionSession::connect`] (WebSocket) or
/// [`ConnectionSession::start`] (any transport, e.g.
/// [`MockTransport`](crate::transport::MockTransport) in tests). The session
/// must be authenticated before any verdict request is sent.
#[derive(Debug)]
pub struct ConnectionSession {
    writer: Arc<AsyncMutex<BoxedSink>>,
    shared: Arc<Shared>,
    options: SessionOptions,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Opens a WebSocket transport to `url` and starts the session over it.
    ///
    /// Blocks until the transport reports open or failed.
    pub async fn connect(url: &Url, options: SessionOptions) -> VerdictResult<Arc<Self>> {
        tracing::debug!(%url, "opening transport");
        let (sink, stream) = transport::ws::connect(url).await?;
        Ok(Self::start(sink, stream, options))
    }

    /// Starts a session over an already-opened transport.
    ///
    /// Spawns the inbound dispatcher and, unless disabled, the heartbeat.
    pub fn start(sink: BoxedSink, stream: BoxedStream, options: SessionOptions) -> Arc<Self> {
        let writer = Arc::new(AsyncMutex::new(sink));
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Connected),
            pending: PendingRequests::new(),
            auth_waiter: Mutex::new(None),
            last_error: Mutex::new(None),
        });

        let reader_task = tokio::spawn(reader_loop(stream, Arc::clone(&shared)));
        let heartbeat_task = options.keep_alive.then(|| {
            tokio::spawn(heartbeat_loop(
                Arc::clone(&writer),
                Arc::clone(&shared),
                options.keep_alive_interval,
            ))
        });

        Arc::new(Self {
            writer,
            shared,
            options,
            reader_task: Mutex::new(Some(reader_task)),
            heartbeat_task: Mutex::new(heartbeat_task),
        })
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        self.shared.lock_state().clone()
    }

    /// Returns the server-assigned session id, if authenticated.
    pub fn session_id(&self) -> Option<String> {
        match &*self.shared.lock_state() {
            SessionState::Authenticated { session_id } => Some(session_id.clone()),
            _ => None,
        }
    }

    /// Returns `true` if the session may carry verdict traffic.
    pub fn is_authenticated(&self) -> bool {
        matches!(
            &*self.shared.lock_state(),
            SessionState::Authenticated { .. }
        )
    }

    /// Returns the last protocol-level error the server reported, if any.
    ///
    /// Kept for diagnostics; an error frame does not by itself abort the
    /// connection.
    pub fn last_protocol_error(&self) -> Option<ErrorMessage> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs the authentication handshake with the given bearer token.
    ///
    /// Blocks until the server answers or the handshake timeout elapses.
    /// On success the server-assigned session id is recorded and returned;
    /// on failure the session remains unusable for verdict traffic and the
    /// caller must reconnect.
    pub async fn authenticate(&self, token: &str) -> VerdictResult<String> {
        {
            let mut state = self.shared.lock_state();
            match &*state {
                SessionState::Connected => *state = SessionState::Authenticating,
                SessionState::Closed => {
                    return Err(VerdictError::connection_closed("session is closed"))
                }
                SessionState::Authenticating | SessionState::Authenticated { .. } => {
                    return Err(VerdictError::authentication(
                        "handshake already ran on this connection; reconnect to authenticate again",
                    ))
                }
                SessionState::Disconnected | SessionState::Connecting => {
                    return Err(VerdictError::connection("transport is not open"))
                }
            }
        }

        let (sender, receiver) = oneshot::channel();
        *self
            .shared
            .auth_waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);

        let frame = AuthRequest::new(token).to_frame()?;
        if let Err(e) = self.send_raw(frame).await {
            drop(self.shared.take_auth_waiter());
            return Err(e);
        }

        let response = match tokio::time::timeout(self.options.auth_timeout, receiver).await {
            Err(_) => {
                drop(self.shared.take_auth_waiter());
                return Err(VerdictError::authentication(format!(
                    "no auth response within {:?}",
                    self.options.auth_timeout
                )));
            }
            Ok(Err(_)) => {
                return Err(VerdictError::connection_closed(
                    "connection closed during authentication",
                ))
            }
            Ok(Ok(response)) => response,
        };

        if !response.success {
            tracing::warn!(text = %response.text, "authentication rejected");
            return Err(VerdictError::authentication(if response.text.is_empty() {
                "token rejected by server".to_string()
            } else {
                response.text
            }));
        }

        let session_id = response
            .session_id
            .ok_or_else(|| VerdictError::protocol("auth response carries no session id"))?;

        {
            let mut state = self.shared.lock_state();
            if *state != SessionState::Authenticating {
                // Closed while the response was in flight.
                return Err(VerdictError::connection_closed(
                    "connection closed during authentication",
                ));
            }
            *state = SessionState::Authenticated {
                session_id: session_id.clone(),
            };
        }
        tracing::info!(session_id = %session_id, "authenticated");
        Ok(session_id)
    }

    /// Sends a text frame.
    ///
    /// Fails with the connection-closed kind unless the session is open
    /// (Connected, Authenticating, or Authenticated).
    pub async fn send(&self, text: String) -> VerdictResult<()> {
        {
            let state = self.shared.lock_state();
            match &*state {
                SessionState::Connected
                | SessionState::Authenticating
                | SessionState::Authenticated { .. } => {}
                other => {
                    return Err(VerdictError::connection_closed(format!(
                        "cannot send in state {other:?}"
                    )))
                }
            }
        }
        self.send_raw(text).await
    }

    async fn send_raw(&self, text: String) -> VerdictResult<()> {
        self.writer.lock().await.send_text(text).await
    }

    /// Closes the session: stops and joins the heartbeat and dispatcher
    /// tasks, closes the transport, and fails every pending request so no
    /// caller is left waiting. Idempotent.
    pub async fn close(&self) {
        *self.shared.lock_state() = SessionState::Closed;

        let heartbeat = self
            .heartbeat_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let reader = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = heartbeat {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = reader {
            task.abort();
            let _ = task.await;
        }

        let _ = self.writer.lock().await.close().await;
        self.shared
            .shutdown(|| VerdictError::connection_closed("connection closed by client"));
        tracing::debug!("session closed");
    }

    pub(crate) fn pending(&self) -> &PendingRequests {
        &self.shared.pending
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // The background tasks hold only `Shared`, not the session, so they
        // would survive the handle. Abort them; close() has already joined
        // them in the normal path.
        for slot in [&self.heartbeat_task, &self.reader_task] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}

/// Dispatches inbound frames for the lifetime of the connection.
async fn reader_loop(mut stream: BoxedStream, shared: Arc<Shared>) {
    loop {
        match stream.next_frame().await {
            Some(Ok(Frame::Text(text))) => match InboundMessage::parse(&text) {
                Ok(InboundMessage::AuthResponse(response)) => {
                    match shared.take_auth_waiter() {
                        Some(waiter) => {
                            let _ = waiter.send(response);
                        }
                        // Nobody is waiting: a duplicate or unsolicited
                        // handshake result. Never fatal.
                        None => tracing::debug!("ignoring unsolicited auth response"),
                    }
                }
                Ok(InboundMessage::VerdictResponse(response)) => {
                    let request_id = response.guid.clone();
                    shared.pending.resolve(&request_id, Ok(response));
                }
                Ok(InboundMessage::Error(error)) => {
                    tracing::warn!(
                        error_type = ?error.error_type,
                        request_id = ?error.request_id,
                        detail = %error.detail(),
                        "server reported an error"
                    );
                    if let Some(request_id) = error.request_id.as_deref() {
                        shared
                            .pending
                            .resolve(request_id, Err(VerdictError::protocol(error.detail())));
                    }
                    *shared
                        .last_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(error);
                }
                Err(e) => {
                    tracing::error!(error = %e, "unintelligible inbound frame, closing session");
                    shared.shutdown(|| {
                        VerdictError::protocol("connection abandoned after unintelligible frame")
                    });
                    break;
                }
            },
            Some(Ok(Frame::Ping)) | Some(Ok(Frame::Pong)) => {
                tracing::trace!("keep-alive frame received");
            }
            Some(Ok(Frame::Close)) => {
                tracing::debug!("server closed the connection");
                shared.shutdown(|| VerdictError::connection_closed("connection closed by server"));
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "transport error, closing session");
                let reason = e.to_string();
                shared.shutdown(move || VerdictError::connection_closed(reason.clone()));
                break;
            }
            None => {
                tracing::debug!("transport ended");
                shared.shutdown(|| VerdictError::connection_closed("transport ended"));
                break;
            }
        }
    }
}

/// Sends a keep-alive ping every `interval` until the session closes.
async fn heartbeat_loop(
    writer: Arc<AsyncMutex<BoxedSink>>,
    shared: Arc<Shared>,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        if *shared.lock_state() == SessionState::Closed {
            break;
        }
        if let Err(e) = writer.lock().await.send_ping().await {
            tracing::warn!(error = %e, "keep-alive ping failed, closing session");
            shared.shutdown(|| VerdictError::connection_closed("keep-alive ping failed"));
            break;
        }
        tracing::trace!("keep-alive ping sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Verdict;
    use crate::transport::{MockPeer, MockTransport};

    const TEST_SHA256: &str = "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";

    fn no_heartbeat() -> SessionOptions {
        SessionOptions::new().with_keep_alive(false)
    }

    /// Answers the next auth request on `peer` with the given outcome.
    async fn answer_auth(peer: &mut MockPeer, success: bool, session_id: &str) {
        let frame = peer.recv_text().await.expect("auth request");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["kind"], "AuthRequest");
        if success {
            peer.send_text(format!(
                r#"{{"kind":"AuthResponse","success":true,"session_id":"{session_id}","text":""}}"#
            ));
        } else {
            peer.send_text(
                r#"{"kind":"AuthResponse","success":false,"session_id":null,"text":"bad token"}"#,
            );
        }
    }

    fn verdict_frame(guid: &str, verdict: &str) -> String {
        format!(
            r#"{{"kind":"VerdictResponse","guid":"{guid}","sha256":"{TEST_SHA256}","verdict":"{verdict}"}}"#
        )
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        assert_eq!(session.state(), SessionState::Connected);

        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token-1").await }
        });
        answer_auth(&mut peer, true, "sess-42").await;

        let session_id = handshake.await.unwrap().unwrap();
        assert_eq!(session_id, "sess-42");
        assert!(session.is_authenticated());
        assert_eq!(session.session_id().as_deref(), Some("sess-42"));
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());

        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("bad").await }
        });
        answer_auth(&mut peer, false, "").await;

        let err = handshake.await.unwrap().unwrap_err();
        assert!(matches!(err, VerdictError::Authentication { .. }));
        assert!(!session.is_authenticated());

        // A second handshake on the same connection is refused.
        let err = session.authenticate("again").await.unwrap_err();
        assert!(matches!(err, VerdictError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_timeout() {
        let (sink, stream, _peer) = MockTransport::pair();
        let options = no_heartbeat().with_auth_timeout(Duration::from_millis(50));
        let session = ConnectionSession::start(sink, stream, options);

        let err = session.authenticate("token").await.unwrap_err();
        assert!(matches!(err, VerdictError::Authentication { .. }));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_verdict_dispatch_resolves_pending() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        handshake.await.unwrap().unwrap();

        let receiver = session.pending().register("req-1").unwrap();
        peer.send_text(verdict_frame("req-1", "Malicious"));

        let response = receiver.await.unwrap().unwrap();
        assert_eq!(response.verdict, Verdict::Malicious);
    }

    #[tokio::test]
    async fn test_unsolicited_verdict_response_is_harmless() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());

        peer.send_text(verdict_frame("nobody-waits", "Clean"));

        // The session keeps working afterwards.
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        assert!(handshake.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_error_frame_fails_correlated_request_only() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        handshake.await.unwrap().unwrap();

        let doomed = session.pending().register("req-bad").unwrap();
        let untouched = session.pending().register("req-ok").unwrap();

        peer.send_text(
            r#"{"kind":"Error","type":"ClientError","problem_details":{"detail":"malformed request"},"request_id":"req-bad"}"#,
        );

        let err = doomed.await.unwrap().unwrap_err();
        assert!(matches!(err, VerdictError::Protocol { .. }));
        assert!(err.to_string().contains("malformed request"));

        // The error is recorded but the session stays up for other requests.
        peer.send_text(verdict_frame("req-ok", "Clean"));
        assert_eq!(untouched.await.unwrap().unwrap().verdict, Verdict::Clean);
        let recorded = session.last_protocol_error().expect("recorded error");
        assert_eq!(recorded.request_id.as_deref(), Some("req-bad"));
    }

    #[tokio::test]
    async fn test_unknown_discriminator_closes_session() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        handshake.await.unwrap().unwrap();

        let receiver = session.pending().register("req-1").unwrap();
        peer.send_text(r#"{"kind":"Telemetry","payload":{}}"#);

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, VerdictError::Protocol { .. }));

        // State converges to Closed once the dispatcher reacts.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_server_close_fails_pending() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        handshake.await.unwrap().unwrap();

        let receiver = session.pending().register("req-1").unwrap();
        peer.close();

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, VerdictError::ConnectionClosed { .. }));
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_traffic() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        handshake.await.unwrap().unwrap();

        let receiver = session.pending().register("req-1").unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, VerdictError::ConnectionClosed { .. }));
        let err = session.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, VerdictError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_auth_response_is_ignored() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let session = ConnectionSession::start(sink, stream, no_heartbeat());
        let handshake = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.authenticate("token").await }
        });
        answer_auth(&mut peer, true, "sess-1").await;
        handshake.await.unwrap().unwrap();

        // A second handshake result arrives out of the blue.
        peer.send_text(
            r#"{"kind":"AuthResponse","success":false,"session_id":null,"text":"late"}"#,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(session.is_authenticated());
        assert_eq!(session.session_id().as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_heartbeat_pings_periodically() {
        let (sink, stream, mut peer) = MockTransport::pair();
        let options = SessionOptions::new().with_keep_alive_interval(Duration::from_millis(10));
        let session = ConnectionSession::start(sink, stream, options);

        let mut pings = 0;
        while pings < 3 {
            match peer.recv().await {
                Some(Frame::Ping) => pings += 1,
                Some(_) => {}
                None => panic!("transport ended before three pings"),
            }
        }
        session.close().await;
    }
}
