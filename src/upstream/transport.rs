//! HTTP transport trait and implementations.
//!
//! Provides abstraction over upstream HTTP access to enable:
//! - Testing handlers and the cache with a scripted mock transport
//! - A single place to enforce network timeouts

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Client, Method};

use crate::error::{Result, UpstreamError};

/// Default timeout for upstream requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent header value for upstream requests.
const USER_AGENT: &str = concat!("apiproxy/", env!("CARGO_PKG_VERSION"));

/// A normalized outbound request.
///
/// Also serves as the cache key: two requests are the same when method, URL
/// and the (sorted) extra headers match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
}

impl UpstreamRequest {
    /// A plain GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a request header. Header names are compared case-insensitively.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self.headers.sort();
        self
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Look up a header value by (lowercase) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// The HTTP-level result of an upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
}

impl UpstreamResponse {
    /// Build a response from its parts.
    pub fn new(status: u16, body: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Text encoding of the body, derived from the `Content-Type` header.
    ///
    /// An explicit `charset` parameter wins. Without one, JSON is `utf-8`,
    /// other `text/*` types default to `ISO-8859-1`, and anything else
    /// (images, octet streams) has no text encoding.
    pub fn encoding(&self) -> Option<String> {
        let content_type = self.content_type.as_deref()?;
        let mut parts = content_type.split(';');
        let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

        let charset = parts.find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        });
        if let Some(charset) = charset.filter(|value| !value.is_empty()) {
            return Some(charset);
        }

        if mime == "application/json" {
            Some("utf-8".to_string())
        } else if mime.starts_with("text/") {
            Some("ISO-8859-1".to_string())
        } else {
            None
        }
    }
}

/// Trait for performing upstream HTTP requests.
pub trait HttpTransport: Send + Sync + Clone + 'static {
    /// Perform the request and return its HTTP-level result.
    ///
    /// Non-2xx statuses are results, not errors; only transport failures
    /// (timeouts, connection errors) produce an `Err`.
    fn execute(&self, request: &UpstreamRequest)
    -> impl Future<Output = Result<UpstreamResponse>> + Send;
}

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(UpstreamError::ClientBuild)?;

        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let url = request.url();
        let mut builder = self.client.request(request.method().clone(), url);
        for (name, value) in request.headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UpstreamError::InvalidHeader { name: name.clone() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| UpstreamError::InvalidHeader { name: name.clone() })?;
            builder = builder.header(header_name, header_value);
        }

        let network_error = |err: reqwest::Error| {
            if err.is_timeout() {
                UpstreamError::Timeout {
                    url: url.to_string(),
                }
            } else {
                UpstreamError::Network {
                    url: url.to_string(),
                    source: err,
                }
            }
        };

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(network_error)?;

        tracing::debug!(url = %url, status, bytes = body.len(), "upstream response");
        Ok(UpstreamResponse {
            status,
            body,
            content_type,
        })
    }
}
