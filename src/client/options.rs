//! Client configuration and per-request options.

use std::time::Duration;

/// Tuning knobs for a [`VerdictClient`](crate::client::VerdictClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the authentication handshake.
    pub auth_timeout: Duration,

    /// How long to wait for a correlated verdict response before the
    /// request fails with a timeout.
    pub request_timeout: Duration,

    /// Whether to run the keep-alive heartbeat on the connection.
    pub keep_alive: bool,

    /// Interval between keep-alive pings.
    pub keep_alive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            keep_alive: true,
            keep_alive_interval: Duration::from_secs(20),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handshake timeout.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the per-request response timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
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
}

/// Per-request options for the `for_*` operations.
///
/// # Examples
///
/// ```rust
/// use verdictwire::ScanOptions;
///
/// let options = ScanOptions::new()
///     .with_use_cache(false)
///     .with_tenant_id("tenant-a");
/// assert!(options.use_hash_lookup);
/// ```
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Whether the service may serve the verdict from its cache.
    pub use_cache: bool,

    /// Whether the service may consult external hash lookups.
    pub use_hash_lookup: bool,

    /// Overrides the generated request id.
    ///
    /// Applies to a single request: reusing one options value with a fixed
    /// id across concurrent calls makes the second registration fail.
    pub request_id: Option<String>,

    /// Attributes the request to a tenant.
    pub tenant_id: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_hash_lookup: true,
            request_id: None,
            tenant_id: None,
        }
    }
}

impl ScanOptions {
    /// Creates options with defaults (cache and hash lookup enabled).
    pub fn new() -> Self {
        Self::default()
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

    /// Overrides the generated request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attributes the request to a tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}
