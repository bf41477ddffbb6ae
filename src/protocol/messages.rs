//! Wire messages exchanged with the verdict service.
//!
//! Every frame on the duplex connection is a JSON object carrying a `kind`
//! discriminator. Cross-cutting fields use snake_case on the wire
//! (`session_id`, `use_cache`, `use_hash_lookup`) regardless of in-memory
//! naming; the tenant attribute envelope uses the service's `tenantId`
//! spelling.

use crate::core::{Sha256, Verdict, VerdictError, VerdictReport, VerdictResult};

use serde::{Deserialize, Serialize};
use url::Url;

/// Frame discriminator carried in every message's `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    /// Client → server: authentication handshake.
    AuthRequest,
    /// Server → client: handshake result.
    AuthResponse,
    /// Client → server: verdict request for a SHA-256.
    VerdictRequest,
    /// Client → server: verdict request for a URL.
    VerdictRequestForUrl,
    /// Client → server: verdict request for a server-hashed stream.
    VerdictRequestForStream,
    /// Server → client: correlated verdict result.
    VerdictResponse,
    /// Server → client: protocol-level error report.
    Error,
}

/// Common behavior of outbound verdict requests: every request carries a
/// correlation id and serializes itself to a text frame.
pub trait WireRequest: Serialize {
    /// Returns the request's correlation id.
    fn guid(&self) -> &str;

    /// Serializes the request to its JSON frame body.
    fn to_frame(&self) -> VerdictResult<String> {
        serde_json::to_string(self)
            .map_err(|e| VerdictError::protocol(format!("failed to encode request: {e}")))
    }
}

/// Optional per-request attribution forwarded to the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAttributes {
    /// Tenant the request is issued on behalf of.
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Authentication handshake request, sent once after the transport opens.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    /// Frame discriminator, always [`Kind::AuthRequest`].
    pub kind: Kind,
    /// Bearer token obtained from the identity provider.
    pub token: String,
    /// Session to resume; always `None` for a fresh connection.
    pub session_id: Option<String>,
}

impl AuthRequest {
    /// Creates a handshake request for a fresh session.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            kind: Kind::AuthRequest,
            token: token.into(),
            session_id: None,
        }
    }

    /// Serializes the request to its JSON frame body.
    pub fn to_frame(&self) -> VerdictResult<String> {
        serde_json::to_string(self)
            .map_err(|e| VerdictError::protocol(format!("failed to encode auth request: {e}")))
    }
}

/// Authentication handshake result.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    /// Whether the token was accepted.
    pub success: bool,
    /// Server-assigned session id; present on success.
    pub session_id: Option<String>,
    /// Human-readable detail, mostly useful on failure.
    #[serde(default)]
    pub text: String,
}

/// Verdict request for a SHA-256 hash (also the first step of the file path).
#[derive(Debug, Clone, Serialize)]
pub struct VerdictRequest {
    /// Frame discriminator, always [`Kind::VerdictRequest`].
    pub kind: Kind,
    /// Hash identifying the content.
    pub sha256: String,
    /// Correlation id for the eventual response(s).
    pub guid: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Whether the service may serve the verdict from its cache.
    pub use_cache: bool,
    /// Whether the service may consult external hash lookups.
    pub use_hash_lookup: bool,
    /// Optional attribution attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_request_attributes: Option<RequestAttributes>,
}

impl VerdictRequest {
    /// Creates a request for the given hash with a fresh correlation id.
    pub fn new(sha256: &Sha256, session_id: impl Into<String>) -> Self {
        Self {
            kind: Kind::VerdictRequest,
            sha256: sha256.to_string(),
            guid: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            use_cache: true,
            use_hash_lookup: true,
            verdict_request_attributes: None,
        }
    }

    /// Overrides the generated correlation id.
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = guid.into();
        self
    }

    /// Sets the cache flag.
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets the hash-lookup flag.
    pub fn with_use_hash_lookup(mut self, use_hash_lookup: bool) -> Self {
        self.use_hash_lookup = use_hash_lookup;
        self
    }

    /// Attributes the request to a tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.verdict_request_attributes = Some(RequestAttributes {
            tenant_id: Some(tenant_id.into()),
        });
        self
    }
}

impl WireRequest for VerdictRequest {
    fn guid(&self) -> &str {
        &self.guid
    }
}

/// Verdict request for a resource behind a URL; the service fetches and
/// scans the resource itself, so this path never uploads.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictRequestForUrl {
    /// Frame discriminator, always [`Kind::VerdictRequestForUrl`].
    pub kind: Kind,
    /// URL of the resource to fetch and scan.
    pub url: String,
    /// Correlation id for the eventual response.
    pub guid: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Whether the service may serve the verdict from its cache.
    pub use_cache: bool,
    /// Whether the service may consult external hash lookups.
    pub use_hash_lookup: bool,
    /// Optional attribution attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_request_attributes: Option<RequestAttributes>,
}

impl VerdictRequestForUrl {
    /// Creates a request for the given URL with a fresh correlation id.
    pub fn new(url: &Url, session_id: impl Into<String>) -> Self {
        Self {
            kind: Kind::VerdictRequestForUrl,
            url: url.to_string(),
            guid: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            use_cache: true,
            use_hash_lookup: true,
            verdict_request_attributes: None,
        }
    }

    /// Overrides the generated correlation id.
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = guid.into();
        self
    }

    /// Sets the cache flag.
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets the hash-lookup flag.
    pub fn with_use_hash_lookup(mut self, use_hash_lookup: bool) -> Self {
        self.use_hash_lookup = use_hash_lookup;
        self
    }

    /// Attributes the request to a tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.verdict_request_attributes = Some(RequestAttributes {
            tenant_id: Some(tenant_id.into()),
        });
        self
    }
}

impl WireRequest for VerdictRequestForUrl {
    fn guid(&self) -> &str {
        &self.guid
    }
}

/// Verdict request announcing a stream upload; the hash is computed
/// server-side, so the request carries no target identity and the Unknown
/// response always implies the upload step.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictRequestForStream {
    /// Frame discriminator, always [`Kind::VerdictRequestForStream`].
    pub kind: Kind,
    /// Correlation id for the eventual response(s).
    pub guid: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Whether the service may serve the verdict from its cache.
    pub use_cache: bool,
    /// Whether the service may consult external hash lookups.
    pub use_hash_lookup: bool,
    /// Optional attribution attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_request_attributes: Option<RequestAttributes>,
}

impl VerdictRequestForStream {
    /// Creates a stream announcement with a fresh correlation id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            kind: Kind::VerdictRequestForStream,
            guid: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            use_cache: true,
            use_hash_lookup: true,
            verdict_request_attributes: None,
        }
    }

    /// Overrides the generated correlation id.
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = guid.into();
        self
    }

    /// Sets the cache flag.
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets the hash-lookup flag.
    pub fn with_use_hash_lookup(mut self, use_hash_lookup: bool) -> Self {
        self.use_hash_lookup = use_hash_lookup;
        self
    }

    /// Attributes the request to a tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.verdict_request_attributes = Some(RequestAttributes {
            tenant_id: Some(tenant_id.into()),
        });
        self
    }
}

impl WireRequest for VerdictRequestForStream {
    fn guid(&self) -> &str {
        &self.guid
    }
}

/// Correlated verdict result from the service.
///
/// For file and stream submissions whose content is unknown, `url` and
/// `upload_token` describe the one-time upload; a second response with the
/// same `guid` follows once the upload has been analyzed.
#[derive(Debug, Clone, Deserialize)]
pub struct VerdictResponse {
    /// Correlation id matching the originating request.
    pub guid: String,
    /// SHA-256 of the analyzed content.
    pub sha256: String,
    /// The verdict.
    pub verdict: Verdict,
    /// One-time upload URL; present only when an upload is expected.
    #[serde(default)]
    pub url: Option<String>,
    /// Authorization token for the upload PUT.
    #[serde(default)]
    pub upload_token: Option<String>,
    /// Name of the detected malware or PUP, if any.
    #[serde(default)]
    pub detection: Option<String>,
    /// File type as classified by the service.
    #[serde(default)]
    pub file_type: Option<String>,
    /// MIME type as classified by the service.
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl VerdictResponse {
    /// Returns `true` if this response asks the client to upload content.
    pub fn expects_upload(&self) -> bool {
        self.verdict.is_unknown() && self.url.is_some()
    }
}

impl From<VerdictResponse> for VerdictReport {
    fn from(response: VerdictResponse) -> Self {
        Self {
            sha256: response.sha256,
            verdict: response.verdict,
            detection: response.detection,
            file_type: response.file_type,
            mime_type: response.mime_type,
        }
    }
}

/// Problem details attached to an error frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemDetails {
    /// Machine-readable problem class.
    #[serde(rename = "type", default)]
    pub problem_type: Option<String>,
    /// Human-readable explanation.
    #[serde(default)]
    pub detail: Option<String>,
}

/// Protocol-level error report from the service.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    /// Machine-readable error class.
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Structured problem details, if provided.
    #[serde(default)]
    pub problem_details: Option<ProblemDetails>,
    /// Correlation id of the request this error belongs to, if any.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Free-form error text, if provided.
    #[serde(default)]
    pub text: Option<String>,
}

impl ErrorMessage {
    /// Returns the most specific human-readable detail available.
    pub fn detail(&self) -> String {
        if let Some(detail) = self
            .problem_details
            .as_ref()
            .and_then(|p| p.detail.as_deref())
        {
            return detail.to_string();
        }
        if let Some(text) = self.text.as_deref() {
            return text.to_string();
        }
        self.error_type
            .clone()
            .unwrap_or_else(|| "unspecified server error".to_string())
    }
}

/// An inbound frame body, discriminated on its `kind` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum InboundMessage {
    /// Handshake result.
    AuthResponse(AuthResponse),
    /// Correlated verdict result.
    VerdictResponse(VerdictResponse),
    /// Protocol-level error report.
    Error(ErrorMessage),
}

impl InboundMessage {
    /// Parses an inbound text frame.
    ///
    /// An unrecognized `kind` discriminator, a missing discriminator, or a
    /// malformed body all yield a protocol error.
    pub fn parse(text: &str) -> VerdictResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| VerdictError::protocol(format!("unparseable inbound frame: {e}")))
    }
}
