//! Socket listener.
//!
//! Each accepted connection carries exactly one exchange: the client writes a
//! base64 JSON query and shuts down its write half, the server answers with an
//! encoded response envelope and closes. Connections are served concurrently,
//! one task each.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::envelope::{QueryEnvelope, ResponseEnvelope};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{self, MAX_PAYLOAD_SIZE, READ_CHUNK_SIZE};
use crate::upstream::HttpTransport;

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub max_payload_bytes: usize,
    /// Time allowed for the client to send its full message.
    pub read_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_SIZE,
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Read until EOF in fixed-size chunks, refusing more than `limit` bytes.
pub async fn read_payload<S>(stream: &mut S, limit: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut payload = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(payload);
        }
        protocol::check_size(payload.len() + read, limit)?;
        payload.extend_from_slice(&chunk[..read]);
    }
}

/// Decode and answer one inbound message.
///
/// Malformed input is answered with a local error envelope.
pub async fn process_payload<T: HttpTransport>(
    dispatcher: &Dispatcher<T>,
    payload: &[u8],
) -> ResponseEnvelope {
    match protocol::decode::<QueryEnvelope>(payload) {
        Ok(query) => dispatcher.resolve_query(&query).await,
        Err(err) => {
            warn!(error = %err, bytes = payload.len(), "undecodable query");
            ResponseEnvelope::local_error(format!("failed to decode query: {err}"))
        }
    }
}

/// Run one exchange over `stream`.
pub async fn handle_connection<S, T>(
    mut stream: S,
    dispatcher: &Dispatcher<T>,
    settings: ServerSettings,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: HttpTransport,
{
    let read = tokio::time::timeout(
        settings.read_timeout,
        read_payload(&mut stream, settings.max_payload_bytes),
    )
    .await;

    let response = match read {
        Ok(Ok(payload)) => process_payload(dispatcher, &payload).await,
        Ok(Err(Error::Protocol(err @ ProtocolError::PayloadTooLarge { .. }))) => {
            warn!(error = %err, "rejecting oversized query");
            ResponseEnvelope::local_error(err.to_string())
        }
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            warn!(timeout = ?settings.read_timeout, "client did not finish sending");
            ResponseEnvelope::local_error(format!(
                "no complete query received within {} seconds",
                settings.read_timeout.as_secs()
            ))
        }
    };

    let encoded = protocol::encode(&response)?;
    stream.write_all(&encoded).await?;
    stream.shutdown().await?;
    debug!(status = response.status_code, bytes = encoded.len(), "response sent");
    Ok(())
}

#[instrument(skip_all, fields(peer = %peer))]
async fn serve_connection<T: HttpTransport>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher<T>>,
    settings: ServerSettings,
) {
    if let Err(err) = handle_connection(stream, &dispatcher, settings).await {
        warn!(error = %err, "connection failed");
    }
}

/// Accept connections until `shutdown` completes.
///
/// In-flight connection tasks are left to finish on their own.
pub async fn serve<T, F>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<T>>,
    settings: ServerSettings,
    shutdown: F,
) -> Result<()>
where
    T: HttpTransport,
    F: Future<Output = ()>,
{
    info!(addr = %listener.local_addr()?, "listening for queries");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                metrics::counter!("apiproxy_connections_total").increment(1);
                tokio::spawn(serve_connection(stream, peer, Arc::clone(&dispatcher), settings));
            }
        }
    }
}

/// Bind `addr` and serve until `shutdown` completes.
pub async fn bind_and_serve<T, F>(
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher<T>>,
    settings: ServerSettings,
    shutdown: F,
) -> Result<()>
where
    T: HttpTransport,
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(addr).await.map_err(|err| {
        Error::Io(io::Error::new(
            err.kind(),
            format!("failed to bind {addr}: {err}"),
        ))
    })?;
    serve(listener, dispatcher, settings, shutdown).await
}
