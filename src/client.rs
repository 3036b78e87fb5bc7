//! In-process client for callers that embed the proxy.
//!
//! Queries for services this process holds a key for are answered by a local
//! [`Dispatcher`]; everything else is forwarded to a remote proxy through a
//! [`RemoteForwarder`].

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::envelope::{Content, QueryEnvelope, ResponseEnvelope, SERVICE_KEY, UNRESOLVED_SERVICE_STATUS};
use crate::error::{Error, ParamError, Result};
use crate::protocol::{self, MAX_PAYLOAD_SIZE};
use crate::server::read_payload;
use crate::services::{Service, ServiceName};
use crate::upstream::HttpTransport;

/// Default time to wait for a remote answer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request/response transport to a remote proxy.
pub trait RemoteForwarder: Send + Sync {
    /// Send `query` and wait for the remote envelope.
    fn forward(&self, query: &QueryEnvelope) -> impl Future<Output = Result<ResponseEnvelope>> + Send;
}

/// Forwarder speaking the socket protocol to a remote listener.
#[derive(Debug, Clone, Copy)]
pub struct TcpForwarder {
    addr: SocketAddr,
    max_payload_bytes: usize,
}

impl TcpForwarder {
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            max_payload_bytes: MAX_PAYLOAD_SIZE,
        }
    }

    /// Cap on the size of the remote answer.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }
}

impl RemoteForwarder for TcpForwarder {
    async fn forward(&self, query: &QueryEnvelope) -> Result<ResponseEnvelope> {
        let payload = protocol::encode(query)?;
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;

        let answer = read_payload(&mut stream, self.max_payload_bytes).await?;
        Ok(protocol::decode(&answer)?)
    }
}

/// Envelope returned when no remote answer arrives in time.
pub fn unanswered(timeout: Duration) -> ResponseEnvelope {
    ResponseEnvelope {
        status_code: UNRESOLVED_SERVICE_STATUS,
        content: Content::Text(format!(
            "API proxy failed to give a response within {} seconds",
            timeout.as_secs()
        )),
        encoding: None,
    }
}

/// Envelope returned when the remote proxy cannot be reached or answers
/// with something undecodable.
pub fn forward_failed(err: &Error) -> ResponseEnvelope {
    ResponseEnvelope {
        status_code: UNRESOLVED_SERVICE_STATUS,
        content: Content::Text(format!("API proxy request failed: {err}")),
        encoding: None,
    }
}

pub struct ProxyClient<T, F> {
    local: Dispatcher<T>,
    remote: F,
}

impl<T: HttpTransport, F: RemoteForwarder> ProxyClient<T, F> {
    pub const fn new(local: Dispatcher<T>, remote: F) -> Self {
        Self { local, remote }
    }

    /// Whether `service` is answered in this process.
    pub fn serves_locally(&self, service: Service) -> bool {
        !service.is_remote() || self.local.api_key(service).is_some()
    }

    /// Answer `query` locally when possible, remotely otherwise.
    pub async fn resolve_query(&self, query: &QueryEnvelope, timeout: Duration) -> ResponseEnvelope {
        if let ServiceName::Known(service) = ServiceName::from_value(query.service())
            && self.serves_locally(service)
        {
            debug!(service = %service, "handling query locally");
            return self.local.resolve_query(query).await;
        }

        debug!("forwarding query to remote proxy");
        match tokio::time::timeout(timeout, self.remote.forward(query)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(error = %err, "remote proxy request failed");
                forward_failed(&err)
            }
            Err(_) => {
                warn!(timeout = ?timeout, "remote proxy did not answer");
                unanswered(timeout)
            }
        }
    }

    /// Query `service` with `params`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::Empty`] when `params` is empty.
    pub async fn request_api(
        &self,
        service: Service,
        mut params: QueryEnvelope,
        timeout: Duration,
    ) -> std::result::Result<ResponseEnvelope, ParamError> {
        if params.is_empty() {
            return Err(ParamError::empty("query_params"));
        }
        params.insert(SERVICE_KEY, service.name());
        Ok(self.resolve_query(&params, timeout).await)
    }
}
