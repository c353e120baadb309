//! Network transports.
//!
//! Two interchangeable bindings, fixed per process:
//!
//! - **Stream**: one TCP connection per envelope. The sender writes a
//!   single newline-terminated JSON envelope and closes; the listener
//!   reads one line per accepted connection.
//! - **RPC**: one unary HTTP call per envelope, `POST /rpc/send` with
//!   `{target, type, payload_json}`, acknowledged by `{ok}`. The server
//!   applies the reconstructed message identically to the stream path.
//!
//! Both are at-most-once and best-effort: no retry, no ordering across
//! connections, failures logged and discarded by the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use fedmesh_wire::{Ack, Envelope, RpcEnvelope, WireError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::system::ActorSystem;

/// Which wire binding a process (or a peer entry) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Line-framed point-to-point stream.
    Stream,
    /// Unary RPC call.
    Rpc,
}

/// A peer table entry: where a logical actor name lives.
#[derive(Debug, Clone)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
    pub kind: TransportKind,
}

/// Transport failures. All of them are logged and swallowed by the
/// fire-and-forget send path.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("rpc call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("rpc peer refused envelope")]
    Nacked,
}

// =============================================================================
// Outbound
// =============================================================================

/// Send one envelope to a peer over its transport binding.
pub(crate) async fn send_envelope(
    http: &reqwest::Client,
    peer: &PeerAddr,
    envelope: &Envelope,
) -> Result<(), TransportError> {
    match peer.kind {
        TransportKind::Stream => send_stream(peer, envelope).await,
        TransportKind::Rpc => send_rpc(http, peer, envelope).await,
    }
}

async fn send_stream(peer: &PeerAddr, envelope: &Envelope) -> Result<(), TransportError> {
    let mut stream = TcpStream::connect((peer.host.as_str(), peer.port))
        .await
        .map_err(TransportError::Connect)?;
    let mut line = envelope.to_json()?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(TransportError::Send)?;
    stream.shutdown().await.map_err(TransportError::Send)?;
    Ok(())
}

async fn send_rpc(
    http: &reqwest::Client,
    peer: &PeerAddr,
    envelope: &Envelope,
) -> Result<(), TransportError> {
    let request = RpcEnvelope::from_envelope(envelope)?;
    let url = format!("http://{}:{}/rpc/send", peer.host, peer.port);
    let ack: Ack = http
        .post(&url)
        .json(&request)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if !ack.ok {
        return Err(TransportError::Nacked);
    }
    Ok(())
}

// =============================================================================
// Inbound
// =============================================================================

/// Bind the listener for the system's transport and spawn its accept loop.
/// Returns the bound address.
pub(crate) async fn bind(
    system: Arc<ActorSystem>,
    host: &str,
    port: u16,
) -> Result<SocketAddr, TransportError> {
    let listener = TcpListener::bind((host, port))
        .await
        .map_err(TransportError::Bind)?;
    let addr = listener.local_addr().map_err(TransportError::Bind)?;

    match system.transport() {
        TransportKind::Stream => {
            tokio::spawn(run_stream_listener(system, listener));
        }
        TransportKind::Rpc => {
            let router = Router::new()
                .route("/rpc/send", post(handle_rpc_send))
                .with_state(system);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    warn!(error = %e, "rpc listener exited");
                }
            });
        }
    }

    Ok(addr)
}

async fn run_stream_listener(system: Arc<ActorSystem>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(remote = %remote, "stream connection accepted");
                let system = Arc::clone(&system);
                tokio::spawn(handle_stream_conn(system, stream));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Read the single envelope line a stream connection carries.
async fn handle_stream_conn(system: Arc<ActorSystem>, stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => {}
        Ok(_) => match Envelope::from_json(&line) {
            Ok(envelope) => system.deliver(envelope).await,
            Err(e) => warn!(error = %e, "dropping undecodable envelope"),
        },
        Err(e) => warn!(error = %e, "recv error"),
    }
}

async fn handle_rpc_send(
    State(system): State<Arc<ActorSystem>>,
    Json(request): Json<RpcEnvelope>,
) -> Json<Ack> {
    match request.into_envelope() {
        Ok(envelope) => {
            system.deliver(envelope).await;
            Json(Ack { ok: true })
        }
        Err(e) => {
            warn!(error = %e, "dropping undecodable rpc envelope");
            Json(Ack { ok: false })
        }
    }
}
