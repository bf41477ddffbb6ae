//! The verdict client: the façade callers use to obtain verdicts.

use crate::auth::TokenSource;
use crate::client::options::{ClientConfig, ScanOptions};
use crate::core::{Sha256, VerdictError, VerdictReport, VerdictResult};
use crate::protocol::{
    VerdictRequest, VerdictRequestForStream, VerdictRequestForUrl, VerdictResponse, WireRequest,
};
use crate::session::{ConnectionSession, SessionOptions, SessionState};
use crate::transport::{BoxedSink, BoxedStream};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use url::Url;

/// Builder for a [`VerdictClient`].
///
/// # Examples
///
/// ```rust,no_run
/// use url::Url;
/// use verdictwire::auth::ClientCredentials;
/// use verdictwire::VerdictClient;
///
/// # fn main() -> verdictwire::VerdictResult<()> {
/// let token_url = Url::parse("https://idp.example.com/token").unwrap();
/// let source = ClientCredentials::new("client-id", "client-secret", token_url)?;
/// let client = VerdictClient::builder(source)
///     .endpoint(Url::parse("wss://verdicts.example.com/ws").unwrap())
///     .build()?;
/// # Ok(()) }
/// ```
pub struct VerdictClientBuilder {
    token_source: Arc<dyn TokenSource>,
    endpoint: Option<Url>,
    config: ClientConfig,
}

impl VerdictClientBuilder {
    fn new(token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            token_source,
            endpoint: None,
            config: ClientConfig::default(),
        }
    }

    /// Sets the verdict service endpoint (a `wss://` URL).
    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets the client configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the client.
    pub fn build(self) -> VerdictResult<VerdictClient> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| VerdictError::invalid_argument("an endpoint URL is required"))?;
        let http = reqwest::Client::builder().build().map_err(|e| {
            VerdictError::invalid_argument(format!("failed to create HTTP client: {e}"))
        })?;
        Ok(VerdictClient {
            token_source: self.token_source,
            endpoint,
            config: self.config,
            http,
            session: Mutex::new(None),
            connecting: AtomicBool::new(false),
        })
    }
}

/// Client for the remote verdict service.
///
/// One client owns at most one [`ConnectionSession`] at a time. After
/// [`connect`](Self::connect) the `for_*` operations may be called from any
/// number of tasks concurrently; all requests share the one connection and
/// are correlated back to their callers by request id, so responses
/// completing out of send order are handled transparently.
///
/// For file and in-memory submissions whose hash the service does not know,
/// the client transparently uploads the content to the one-time URL in the
/// first response and waits for the second, final response.
pub struct VerdictClient {
    token_source: Arc<dyn TokenSource>,
    endpoint: Url,
    config: ClientConfig,
    http: reqwest::Client,
    session: Mutex<Option<Arc<ConnectionSession>>>,
    connecting: AtomicBool,
}

impl VerdictClient {
    /// Creates a builder using the given token source.
    pub fn builder(token_source: impl TokenSource + 'static) -> VerdictClientBuilder {
        VerdictClientBuilder::new(Arc::new(token_source))
    }

    /// Connects to the configured endpoint and authenticates.
    ///
    /// Any previous session is closed first. Fails with the authentication
    /// kind if the token cannot be acquired or the handshake is rejected,
    /// and with the connection kind if the transport cannot be opened.
    pub async fn connect(&self) -> VerdictResult<()> {
        self.disconnect().await;
        self.connecting.store(true, Ordering::SeqCst);
        let result = ConnectionSession::connect(&self.endpoint, self.session_options()).await;
        self.connecting.store(false, Ordering::SeqCst);
        self.install_session(result?).await
    }

    /// Connects over an already-opened transport.
    ///
    /// Useful for tests (see
    /// [`MockTransport`](crate::transport::MockTransport)) and for embedding
    /// the client on custom transports.
    pub async fn connect_with(&self, sink: BoxedSink, stream: BoxedStream) -> VerdictResult<()> {
        self.disconnect().await;
        let session = ConnectionSession::start(sink, stream, self.session_options());
        self.install_session(session).await
    }

    async fn install_session(&self, session: Arc<ConnectionSession>) -> VerdictResult<()> {
        let token = match self.token_source.get_token().await {
            Ok(token) => token,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        if let Err(e) = session.authenticate(&token).await {
            session.close().await;
            return Err(e);
        }
        *self.lock_session() = Some(session);
        Ok(())
    }

    /// Closes the current session, failing any in-flight requests.
    pub async fn disconnect(&self) {
        let session = self.lock_session().take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        if self.connecting.load(Ordering::SeqCst) {
            return SessionState::Connecting;
        }
        match &*self.lock_session() {
            Some(session) => session.state(),
            None => SessionState::Disconnected,
        }
    }

    /// Requests a verdict for a SHA-256 hash.
    ///
    /// The hash-only path never uploads: an unknown hash simply yields an
    /// `Unknown` report.
    pub async fn for_sha256(
        &self,
        sha256: &Sha256,
        options: &ScanOptions,
    ) -> VerdictResult<VerdictReport> {
        let (session, session_id) = self.session_handle()?;
        let mut request = VerdictRequest::new(sha256, session_id)
            .with_use_cache(options.use_cache)
            .with_use_hash_lookup(options.use_hash_lookup);
        if let Some(request_id) = &options.request_id {
            request = request.with_guid(request_id.clone());
        }
        if let Some(tenant_id) = &options.tenant_id {
            request = request.with_tenant_id(tenant_id.clone());
        }
        let response = self.send_and_wait(&session, request).await?;
        Ok(response.into())
    }

    /// Requests verdicts for a list of hashes concurrently.
    ///
    /// The output order matches the input order.
    pub async fn for_sha256_list(
        &self,
        hashes: &[Sha256],
        options: &ScanOptions,
    ) -> Vec<VerdictResult<VerdictReport>> {
        futures_util::future::join_all(hashes.iter().map(|sha256| self.for_sha256(sha256, options)))
            .await
    }

    /// Requests a verdict for in-memory content.
    ///
    /// The content's SHA-256 is submitted first; if the service does not
    /// know it and asks for an upload, the bytes are PUT to the one-time
    /// URL and the second response for the same request id delivers the
    /// final verdict.
    pub async fn for_buf(
        &self,
        data: Vec<u8>,
        options: &ScanOptions,
    ) -> VerdictResult<VerdictReport> {
        let (session, session_id) = self.session_handle()?;
        let sha256 = Sha256::from(data.as_slice());
        let mut request = VerdictRequest::new(&sha256, session_id)
            .with_use_cache(options.use_cache)
            .with_use_hash_lookup(options.use_hash_lookup);
        if let Some(request_id) = &options.request_id {
            request = request.with_guid(request_id.clone());
        }
        if let Some(tenant_id) = &options.tenant_id {
            request = request.with_tenant_id(tenant_id.clone());
        }
        let request_id = request.guid().to_string();
        let response = self.send_and_wait(&session, request).await?;

        if !response.expects_upload() {
            return Ok(response.into());
        }
        let content_length = data.len() as u64;
        let final_response = self
            .finish_upload(&session, &request_id, response, data.into(), content_length)
            .await?;
        Ok(final_response.into())
    }

    /// Requests a verdict for the file at `path`.
    ///
    /// Behaves like [`for_buf`](Self::for_buf) on the file's content.
    pub async fn for_file(
        &self,
        path: &Path,
        options: &ScanOptions,
    ) -> VerdictResult<VerdictReport> {
        let data = tokio::fs::read(path).await?;
        self.for_buf(data, options).await
    }

    /// Requests verdicts for a list of files concurrently.
    ///
    /// The output order matches the input order.
    pub async fn for_file_list(
        &self,
        paths: &[PathBuf],
        options: &ScanOptions,
    ) -> Vec<VerdictResult<VerdictReport>> {
        futures_util::future::join_all(paths.iter().map(|path| self.for_file(path, options))).await
    }

    /// Requests a verdict for streamed content of known length.
    ///
    /// The hash is computed server-side: the request only announces intent,
    /// the service always answers `Unknown` with an upload URL, and the
    /// verdict arrives in the response following the upload.
    pub async fn for_stream<S>(
        &self,
        stream: S,
        content_length: u64,
        options: &ScanOptions,
    ) -> VerdictResult<VerdictReport>
    where
        S: futures_util::stream::TryStream + Send + 'static,
        S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        bytes::Bytes: From<S::Ok>,
    {
        let (session, session_id) = self.session_handle()?;
        let mut request = VerdictRequestForStream::new(session_id)
            .with_use_cache(options.use_cache)
            .with_use_hash_lookup(options.use_hash_lookup);
        if let Some(request_id) = &options.request_id {
            request = request.with_guid(request_id.clone());
        }
        if let Some(tenant_id) = &options.tenant_id {
            request = request.with_tenant_id(tenant_id.clone());
        }
        let request_id = request.guid().to_string();
        let response = self.send_and_wait(&session, request).await?;

        if !response.verdict.is_unknown() {
            return Err(VerdictError::protocol(
                "verdict delivered before the stream content was uploaded",
            ));
        }
        let final_response = self
            .finish_upload(
                &session,
                &request_id,
                response,
                reqwest::Body::wrap_stream(stream),
                content_length,
            )
            .await?;
        Ok(final_response.into())
    }

    /// Requests a verdict for a resource behind a URL.
    ///
    /// The service fetches and scans the resource itself; this path never
    /// uploads.
    pub async fn for_url(&self, url: &Url, options: &ScanOptions) -> VerdictResult<VerdictReport> {
        let (session, session_id) = self.session_handle()?;
        let mut request = VerdictRequestForUrl::new(url, session_id)
            .with_use_cache(options.use_cache)
            .with_use_hash_lookup(options.use_hash_lookup);
        if let Some(request_id) = &options.request_id {
            request = request.with_guid(request_id.clone());
        }
        if let Some(tenant_id) = &options.tenant_id {
            request = request.with_tenant_id(tenant_id.clone());
        }
        let response = self.send_and_wait(&session, request).await?;
        Ok(response.into())
    }

    /// Requests verdicts for a list of URLs concurrently.
    ///
    /// The output order matches the input order.
    pub async fn for_url_list(
        &self,
        urls: &[Url],
        options: &ScanOptions,
    ) -> Vec<VerdictResult<VerdictReport>> {
        futures_util::future::join_all(urls.iter().map(|url| self.for_url(url, options))).await
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions::new()
            .with_keep_alive(self.config.keep_alive)
            .with_keep_alive_interval(self.config.keep_alive_interval)
            .with_auth_timeout(self.config.auth_timeout)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Arc<ConnectionSession>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current session and its id, or the connection-closed
    /// kind if there is no authenticated session.
    fn session_handle(&self) -> VerdictResult<(Arc<ConnectionSession>, String)> {
        let guard = self.lock_session();
        let session = guard
            .as_ref()
            .ok_or_else(|| VerdictError::connection_closed("not connected; call connect() first"))?;
        let session_id = session
            .session_id()
            .ok_or_else(|| VerdictError::connection_closed("session is not authenticated"))?;
        Ok((Arc::clone(session), session_id))
    }

    /// Registers the pending slot, sends the request frame, and waits for
    /// the correlated response.
    ///
    /// The slot is registered before the frame leaves, so a response
    /// arriving faster than the local bookkeeping cannot be lost.
    async fn send_and_wait<R: WireRequest>(
        &self,
        session: &Arc<ConnectionSession>,
        request: R,
    ) -> VerdictResult<VerdictResponse> {
        let request_id = request.guid().to_string();
        let frame = request.to_frame()?;
        let receiver = session.pending().register(&request_id)?;
        tracing::debug!(request_id = %request_id, "sending verdict request");
        if let Err(e) = session.send(frame).await {
            session.pending().remove(&request_id);
            return Err(e);
        }
        self.await_slot(session, &request_id, receiver).await
    }

    async fn await_slot(
        &self,
        session: &Arc<ConnectionSession>,
        request_id: &str,
        receiver: oneshot::Receiver<VerdictResult<VerdictResponse>>,
    ) -> VerdictResult<VerdictResponse> {
        match tokio::time::timeout(self.config.request_timeout, receiver).await {
            Err(_) => {
                // The slot is stale now; a late response will be dropped by
                // the dispatcher.
                session.pending().remove(request_id);
                tracing::warn!(request_id = %request_id, "request timed out");
                Err(VerdictError::timeout(self.config.request_timeout))
            }
            Ok(Err(_)) => Err(VerdictError::connection_closed(
                "connection closed while waiting for a response",
            )),
            Ok(Ok(result)) => result,
        }
    }

    /// Uploads content for an `Unknown` response and waits for the second
    /// response carrying the final verdict.
    async fn finish_upload(
        &self,
        session: &Arc<ConnectionSession>,
        request_id: &str,
        response: VerdictResponse,
        body: reqwest::Body,
        content_length: u64,
    ) -> VerdictResult<VerdictResponse> {
        let upload_url = response
            .url
            .as_deref()
            .ok_or_else(|| VerdictError::protocol("unknown verdict without an upload url"))?;
        let upload_token = response
            .upload_token
            .as_deref()
            .ok_or_else(|| VerdictError::protocol("upload url without an upload token"))?;

        // The same request id answers a second time after the upload; its
        // slot is registered before the PUT so the post-upload response
        // cannot race past us.
        let receiver = session.pending().register(request_id)?;
        tracing::debug!(request_id = %request_id, content_length, "uploading content");
        if let Err(e) = self
            .put_content(upload_url, upload_token, body, content_length)
            .await
        {
            session.pending().remove(request_id);
            return Err(e);
        }
        self.await_slot(session, request_id, receiver).await
    }

    async fn put_content(
        &self,
        upload_url: &str,
        upload_token: &str,
        body: reqwest::Body,
        content_length: u64,
    ) -> VerdictResult<()> {
        let url = Url::parse(upload_url)
            .map_err(|e| VerdictError::protocol(format!("invalid upload url: {e}")))?;
        let response = self
            .http
            .put(url)
            .header("Authorization", upload_token)
            .header("Content-Length", content_length)
            .body(body)
            .send()
            .await
            .map_err(|e| VerdictError::upload_transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            let detail = response.text().await.unwrap_or_default();
            return Err(VerdictError::upload(status.as_u16(), detail));
        }
        Ok(())
    }
}

impl std::fmt::Debug for VerdictClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Verdict;
    use crate::transport::{MockPeer, MockTransport};

    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const MALICIOUS_SHA256: &str =
        "ab5788279033b0a96f2d342e5f35159f103f69e0191dd391e036a1cd711791a2";

    #[derive(Debug)]
    struct StaticToken;

    #[async_trait]
    impl crate::auth::TokenSource for StaticToken {
        async fn get_token(&self) -> VerdictResult<String> {
            Ok("test-token".to_string())
        }
    }

    fn options() -> ScanOptions {
        ScanOptions::default()
    }

    fn parse(frame: &str) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    fn verdict_frame(guid: &str, sha256: &str, verdict: &str, extra: &str) -> String {
        format!(
            r#"{{"kind":"VerdictResponse","guid":"{guid}","sha256":"{sha256}","verdict":"{verdict}"{extra}}}"#
        )
    }

    /// Builds a client over a mock transport and completes the handshake.
    async fn connected_client(config: ClientConfig) -> (Arc<VerdictClient>, MockPeer) {
        let (sink, stream, peer) = MockTransport::pair();
        let client = Arc::new(
            VerdictClient::builder(StaticToken)
                .endpoint(Url::parse("wss://verdicts.invalid/ws").unwrap())
                .with_config(config.with_keep_alive(false))
                .build()
                .unwrap(),
        );

        let handshake = tokio::spawn(async move {
            let mut peer = peer;
            let frame = peer.recv_text().await.expect("auth request");
            let value = parse(&frame);
            assert_eq!(value["kind"], "AuthRequest");
            assert_eq!(value["token"], "test-token");
            peer.send_text(
                r#"{"kind":"AuthResponse","success":true,"session_id":"sess-e2e","text":""}"#,
            );
            peer
        });
        client.connect_with(sink, stream).await.unwrap();
        let peer = handshake.await.unwrap();
        assert_eq!(
            client.state(),
            SessionState::Authenticated {
                session_id: "sess-e2e".to_string()
            }
        );
        (client, peer)
    }

    /// Answers verdict requests by looking the sha256 up in `table`;
    /// anything absent is answered `Unknown`.
    async fn answer_requests(mut peer: MockPeer, table: HashMap<String, &'static str>, count: usize) {
        for _ in 0..count {
            let frame = peer.recv_text().await.expect("verdict request");
            let value = parse(&frame);
            let guid = value["guid"].as_str().unwrap();
            let sha256 = value["sha256"].as_str().unwrap();
            let verdict = table.get(sha256).copied().unwrap_or("Unknown");
            peer.send_text(verdict_frame(guid, sha256, verdict, ""));
        }
    }

    /// Minimal HTTP endpoint that accepts one PUT and answers with
    /// `status`. Yields the request head and body for assertions.
    async fn spawn_upload_sink(status: u16) -> (String, oneshot::Receiver<(String, Vec<u8>)>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 4096];

            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "peer closed before headers were complete");
                buffer.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);

            while buffer.len() < header_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "peer closed before body was complete");
                buffer.extend_from_slice(&chunk[..n]);
            }
            let body = buffer[header_end..header_end + content_length].to_vec();

            let reason = if status == 200 { "OK" } else { "Error" };
            let response = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();

            let _ = done_tx.send((head, body));
        });

        (format!("http://{address}/upload"), done_rx)
    }

    #[tokio::test]
    async fn test_not_connected_fails_with_connection_closed() {
        let client = VerdictClient::builder(StaticToken)
            .endpoint(Url::parse("wss://verdicts.invalid/ws").unwrap())
            .build()
            .unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);

        let sha256 = Sha256::try_from(MALICIOUS_SHA256).unwrap();
        let err = client.for_sha256(&sha256, &options()).await.unwrap_err();
        assert!(matches!(err, VerdictError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_malicious_hash_yields_malicious() {
        let (client, peer) = connected_client(ClientConfig::default()).await;
        let table = HashMap::from([(MALICIOUS_SHA256.to_string(), "Malicious")]);
        let server = tokio::spawn(answer_requests(peer, table, 1));

        let sha256 = Sha256::try_from(MALICIOUS_SHA256).unwrap();
        let report = client.for_sha256(&sha256, &options()).await.unwrap();

        assert_eq!(report.verdict, Verdict::Malicious);
        assert_eq!(report.sha256, MALICIOUS_SHA256);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_hash_never_uploads() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let server = tokio::spawn(async move {
            let frame = peer.recv_text().await.unwrap();
            let value = parse(&frame);
            let guid = value["guid"].as_str().unwrap();
            let sha256 = value["sha256"].as_str().unwrap();
            // No upload url: the hash path ends here.
            peer.send_text(verdict_frame(guid, sha256, "Unknown", ""));
            peer
        });

        let sha256 = Sha256::try_from("11".repeat(32).as_str()).unwrap();
        let report = client.for_sha256(&sha256, &options()).await.unwrap();

        assert_eq!(report.verdict, Verdict::Unknown);
        // No further frame was sent after the response.
        let mut peer = server.await.unwrap();
        client.disconnect().await;
        assert_eq!(peer.recv_text().await, None);
    }

    #[tokio::test]
    async fn test_clean_buffer_yields_clean() {
        let (client, peer) = connected_client(ClientConfig::default()).await;
        let content = b"known clean content".to_vec();
        let sha256 = Sha256::from(content.as_slice());
        let table = HashMap::from([(sha256.to_string(), "Clean")]);
        let server = tokio::spawn(answer_requests(peer, table, 1));

        let report = client.for_buf(content, &options()).await.unwrap();
        assert_eq!(report.verdict, Verdict::Clean);
        assert_eq!(report.sha256, sha256.as_str());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_buffer_uploads_then_final_verdict() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let (upload_url, upload_done) = spawn_upload_sink(200).await;
        let content = b"previously unseen content".to_vec();
        let expected = content.clone();

        let server = tokio::spawn(async move {
            let frame = peer.recv_text().await.unwrap();
            let value = parse(&frame);
            let guid = value["guid"].as_str().unwrap().to_string();
            let sha256 = value["sha256"].as_str().unwrap().to_string();
            peer.send_text(verdict_frame(
                &guid,
                &sha256,
                "Unknown",
                &format!(r#","url":"{upload_url}","upload_token":"upload-tok-1""#),
            ));

            // The second response goes out only after the upload landed.
            let (head, body) = upload_done.await.unwrap();
            assert!(head.starts_with("PUT "));
            assert!(head.to_lowercase().contains("authorization: upload-tok-1"));
            assert_eq!(body, expected);

            peer.send_text(verdict_frame(
                &guid,
                &sha256,
                "Malicious",
                r#","detection":"Gen.Test.Detection""#,
            ));
        });

        let report = client.for_buf(content, &options()).await.unwrap();
        assert_eq!(report.verdict, Verdict::Malicious);
        assert_eq!(report.detection.as_deref(), Some("Gen.Test.Detection"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_upload_surfaces_upload_error() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let (upload_url, _upload_done) = spawn_upload_sink(500).await;

        let server = tokio::spawn(async move {
            let frame = peer.recv_text().await.unwrap();
            let value = parse(&frame);
            let guid = value["guid"].as_str().unwrap().to_string();
            let sha256 = value["sha256"].as_str().unwrap().to_string();
            peer.send_text(verdict_frame(
                &guid,
                &sha256,
                "Unknown",
                &format!(r#","url":"{upload_url}","upload_token":"upload-tok-1""#),
            ));
        });

        let err = client
            .for_buf(b"doomed content".to_vec(), &options())
            .await
            .unwrap_err();
        match err {
            VerdictError::Upload { status, .. } => assert_eq!(status, Some(500)),
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_uploads_and_resolves() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let (upload_url, upload_done) = spawn_upload_sink(200).await;
        let chunks: Vec<VerdictResult<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"streamed ")),
            Ok(bytes::Bytes::from_static(b"content")),
        ];
        let stream = futures_util::stream::iter(chunks);

        let server = tokio::spawn(async move {
            let frame = peer.recv_text().await.unwrap();
            let value = parse(&frame);
            assert_eq!(value["kind"], "VerdictRequestForStream");
            let guid = value["guid"].as_str().unwrap().to_string();
            let sha256 = "33".repeat(32);
            peer.send_text(verdict_frame(
                &guid,
                &sha256,
                "Unknown",
                &format!(r#","url":"{upload_url}","upload_token":"upload-tok-2""#),
            ));

            let (_head, body) = upload_done.await.unwrap();
            assert_eq!(body, b"streamed content");
            peer.send_text(verdict_frame(&guid, &sha256, "Clean", ""));
        });

        let report = client
            .for_stream(stream, "streamed content".len() as u64, &options())
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Clean);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_url_request_single_response() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let server = tokio::spawn(async move {
            let frame = peer.recv_text().await.unwrap();
            let value = parse(&frame);
            assert_eq!(value["kind"], "VerdictRequestForUrl");
            assert_eq!(value["url"], "https://files.example.com/sample.exe");
            let guid = value["guid"].as_str().unwrap().to_string();
            peer.send_text(verdict_frame(&guid, &"44".repeat(32), "Malicious", ""));
        });

        let url = Url::parse("https://files.example.com/sample.exe").unwrap();
        let report = client.for_url(&url, &options()).await.unwrap();
        assert_eq!(report.verdict, Verdict::Malicious);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let malicious = Sha256::try_from("11".repeat(32).as_str()).unwrap();
        let clean = Sha256::try_from("22".repeat(32).as_str()).unwrap();

        let server = tokio::spawn(async move {
            // Collect both requests first, then answer in reverse order.
            let mut requests = Vec::new();
            for _ in 0..2 {
                let value = parse(&peer.recv_text().await.unwrap());
                requests.push((
                    value["guid"].as_str().unwrap().to_string(),
                    value["sha256"].as_str().unwrap().to_string(),
                ));
            }
            for (guid, sha256) in requests.into_iter().rev() {
                let verdict = if sha256.starts_with("11") {
                    "Malicious"
                } else {
                    "Clean"
                };
                peer.send_text(verdict_frame(&guid, &sha256, verdict, ""));
            }
        });

        let reports = client
            .for_sha256_list(&[malicious, clean], &options())
            .await;
        let first = reports[0].as_ref().unwrap();
        let second = reports[1].as_ref().unwrap();
        assert_eq!(first.verdict, Verdict::Malicious);
        assert_eq!(second.verdict, Verdict::Clean);
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_the_request_id() {
        let config = ClientConfig::default().with_request_timeout(Duration::from_millis(100));
        let (client, mut peer) = connected_client(config).await;
        let sha256 = Sha256::try_from("55".repeat(32).as_str()).unwrap();
        let scan = options().with_request_id("fixed-id");

        // The peer swallows the first request entirely.
        let err = client.for_sha256(&sha256, &scan).await.unwrap_err();
        assert!(matches!(err, VerdictError::Timeout { .. }));
        let _ = peer.recv_text().await.unwrap();

        // The stale slot is gone: the same id can be used again.
        let server = tokio::spawn(async move {
            let value = parse(&peer.recv_text().await.unwrap());
            assert_eq!(value["guid"], "fixed-id");
            peer.send_text(verdict_frame(
                "fixed-id",
                value["sha256"].as_str().unwrap(),
                "Clean",
                "",
            ));
        });
        let report = client.for_sha256(&sha256, &scan).await.unwrap();
        assert_eq!(report.verdict, Verdict::Clean);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tenant_id_rides_in_attributes() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let server = tokio::spawn(async move {
            let value = parse(&peer.recv_text().await.unwrap());
            assert_eq!(value["verdict_request_attributes"]["tenantId"], "tenant-7");
            let guid = value["guid"].as_str().unwrap().to_string();
            let sha256 = value["sha256"].as_str().unwrap().to_string();
            peer.send_text(verdict_frame(&guid, &sha256, "Clean", ""));
        });

        let sha256 = Sha256::try_from("66".repeat(32).as_str()).unwrap();
        let scan = options().with_tenant_id("tenant-7");
        client.for_sha256(&sha256, &scan).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_fails_inflight_requests() {
        let (client, mut peer) = connected_client(ClientConfig::default()).await;
        let sha256 = Sha256::try_from("77".repeat(32).as_str()).unwrap();

        let pending = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.for_sha256(&sha256, &ScanOptions::default()).await }
        });
        // Wait until the request is on the wire, then pull the plug.
        let _ = peer.recv_text().await.unwrap();
        client.disconnect().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, VerdictError::ConnectionClosed { .. }));
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_token_failure_propagates_from_connect() {
        #[derive(Debug)]
        struct FailingTokens;

        #[async_trait]
        impl crate::auth::TokenSource for FailingTokens {
            async fn get_token(&self) -> VerdictResult<String> {
                Err(VerdictError::authentication("invalid_client"))
            }
        }

        let (sink, stream, _peer) = MockTransport::pair();
        let client = VerdictClient::builder(FailingTokens)
            .endpoint(Url::parse("wss://verdicts.invalid/ws").unwrap())
            .build()
            .unwrap();

        let err = client.connect_with(sink, stream).await.unwrap_err();
        assert!(matches!(err, VerdictError::Authentication { .. }));
        assert_eq!(client.state(), SessionState::Disconnected);
    }
}
