//! The [`Fetcher`] capability: the only way the dispatcher talks to an
//! upstream.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::FetchError;

/// Timeouts and pool sizing for outbound upstream connections.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// TCP connect timeout.
    pub timeout_tcp: Duration,
    /// TLS handshake timeout.
    ///
    /// `reqwest` does not expose this separately from the overall request
    /// timeout; see [`ReqwestFetcher::new`] for how the two are collapsed.
    pub timeout_tls: Duration,
    /// Time to wait for response headers after the request is sent.
    pub timeout_headers: Duration,
    /// How long an idle pooled connection is kept before being closed.
    pub idle_timeout: Duration,
    /// Maximum number of idle connections kept per host.
    pub max_idle_conns: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_tcp: Duration::from_secs(5),
            timeout_tls: Duration::from_secs(5),
            timeout_headers: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(90),
            max_idle_conns: 100,
        }
    }
}

/// A capability for issuing a single upstream HTTP request.
///
/// Implemented by [`ReqwestFetcher`] in production and by test doubles in
/// the dispatcher's own test module.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Issues `method url` with `headers` and `body`, returning the
    /// upstream's status, response headers, and body on success.
    async fn fetch(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes), FetchError>;
}

/// A [`Fetcher`] backed by a single shared [`reqwest::Client`].
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Builds a fetcher from the configured timeouts and pool limits.
    ///
    /// `reqwest` has no separate TLS-handshake timeout; `timeout_tls` is
    /// folded into the overall request timeout alongside `timeout_headers`
    /// by taking their sum, so a slow handshake and a slow response header
    /// wait are both bounded by roughly the same wall-clock budget the Go
    /// original enforced as two independent timers. This is a deliberate,
    /// documented narrowing of the original's timeout surface.
    pub fn new(config: &HttpClientConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout_tcp)
            .timeout(config.timeout_tls + config.timeout_headers)
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_conns)
            .build()
            .map_err(FetchError::Request)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes), FetchError> {
        let request = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .build()
            .map_err(FetchError::Request)?;

        let response = self.client.execute(request).await.map_err(FetchError::Request)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(FetchError::Request)?;
        Ok((status, headers, body))
    }
}
