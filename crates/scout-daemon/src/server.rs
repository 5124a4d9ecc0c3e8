//! WebSocket sync server
//!
//! Each connection is a small state machine: `connecting → handshaken →
//! active`. The first frame must be `connection.init`; after that the server
//! answers `validate`/`add`/`remove`/`ping` commands and pushes every
//! snapshot update. Command responses are acks only — the resulting state
//! reaches every client, including the requester, through the snapshot
//! broadcast, so all clients converge through one code path.
//!
//! Every connection owns a bounded outbound queue drained by its own writer
//! task; a slow client stalls only itself. Snapshot delivery rides the
//! broadcast channel, and a lagging subscriber skips stale snapshots —
//! safe, because every snapshot is complete.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use scout_core::error::ValidationErrorKind;
use scout_core::messages::{
    ActionResponse, ClientMessage, DaemonMessage, DaemonPush, ValidateResponse, ValidationIssue,
};
use scout_core::types::ClientView;

use crate::fmdm::FmdmService;
use crate::orchestrator::FolderOrchestrator;

/// Outbound frames buffered per connection before the writer drains them
const OUTBOUND_QUEUE: usize = 64;

/// How long a fresh connection may sit in `connecting` before we give up
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered client connection
struct ClientHandle {
    #[allow(dead_code)] // kept for targeted sends and diagnostics
    view: ClientView,
    #[allow(dead_code)]
    tx: mpsc::Sender<String>,
}

/// The daemon's client-facing sync server
pub struct SyncServer {
    orchestrator: Arc<FolderOrchestrator>,
    fmdm: Arc<FmdmService>,
    /// Active connections by client id
    clients: Arc<DashMap<String, ClientHandle>>,
}

impl SyncServer {
    pub fn new(orchestrator: Arc<FolderOrchestrator>, fmdm: Arc<FmdmService>) -> Self {
        Self {
            orchestrator,
            fmdm,
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Start the sync server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Accept loop over an already-bound listener (lets tests use port 0)
    pub async fn serve_with_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        if let Ok(addr) = listener.local_addr() {
            info!("Sync server listening on {}", addr);
        }

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let orchestrator = self.orchestrator.clone();
            let fmdm = self.fmdm.clone();
            let clients = self.clients.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer_addr, orchestrator, fmdm, clients).await
                {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }

    /// Number of connected clients (for monitoring)
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Handle a single connection (HTTP probe or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    orchestrator: Arc<FolderOrchestrator>,
    fmdm: Arc<FmdmService>,
    clients: Arc<DashMap<String, ClientHandle>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Peek at the first bytes to detect plain HTTP (health probes)
    let mut peek_buf = [0u8; 4];
    stream.peek(&mut peek_buf).await?;
    if &peek_buf == b"GET " {
        return handle_http_request(&mut stream, &fmdm, clients.len()).await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // connecting → handshaken: the first frame must be connection.init
    let first = match timeout(HANDSHAKE_TIMEOUT, ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => {
            debug!("Connection from {} closed before handshake", peer_addr);
            return Ok(());
        }
        Err(_) => {
            debug!("Connection from {} timed out in handshake", peer_addr);
            return Ok(());
        }
    };

    let kind = match ClientMessage::from_json(&first) {
        Ok(ClientMessage::ConnectionInit { client_type }) => client_type,
        Ok(_) | Err(_) => {
            warn!(
                "Connection from {} did not open with connection.init, closing",
                peer_addr
            );
            return Ok(());
        }
    };

    let client_id = generate_client_id();
    let view = ClientView {
        id: client_id.clone(),
        kind,
        connected_at: current_timestamp(),
    };

    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    // Writer task: drains this connection's queue only
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Subscribe before registering so this client cannot miss the snapshot
    // that announces its own arrival.
    let mut updates = fmdm.subscribe();
    let fwd_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(snapshot) => {
                    let push = DaemonMessage::Push(DaemonPush::FmdmUpdate {
                        fmdm: (*snapshot).clone(),
                    });
                    let frame = match push.to_json() {
                        Ok(f) => f,
                        Err(_) => continue,
                    };
                    if fwd_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Client fell behind, skipped {} stale snapshot(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    clients.insert(
        client_id.clone(),
        ClientHandle {
            view: view.clone(),
            tx: out_tx.clone(),
        },
    );
    // Republishes with this client included; the forwarder delivers it as
    // the connection's first fmdm.update.
    fmdm.client_connected(view);

    info!("Client {} connected from {} ({:?})", client_id, peer_addr, kind);

    // active: serve commands until the client goes away
    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error from {}: {:?}", client_id, e);
                break;
            }
        };

        let request = match ClientMessage::from_json(&text) {
            Ok(r) => r,
            Err(e) => {
                warn!("Invalid message from {}: {}", client_id, e);
                continue;
            }
        };

        if let Some(response) = handle_message(request, &orchestrator) {
            let frame = match response.to_json() {
                Ok(f) => f,
                Err(_) => continue,
            };
            if out_tx.send(frame).await.is_err() {
                break;
            }
        }
    }

    // Cleanup on disconnect
    clients.remove(&client_id);
    fmdm.client_disconnected(&client_id);
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;

    info!("Client {} disconnected", client_id);
    Ok(())
}

/// Handle one command. Responses are synchronous acks; state changes are
/// only observable through the snapshot broadcast.
fn handle_message(
    msg: ClientMessage,
    orchestrator: &Arc<FolderOrchestrator>,
) -> Option<DaemonMessage> {
    match msg {
        ClientMessage::ConnectionInit { .. } => {
            debug!("Duplicate connection.init ignored");
            None
        }

        ClientMessage::Ping { id } => Some(DaemonMessage::Push(DaemonPush::Pong { id })),

        ClientMessage::FolderValidate { id, payload } => {
            let Some(payload) = payload else {
                return Some(DaemonMessage::Validate(ValidateResponse {
                    id,
                    valid: false,
                    errors: vec![ValidationIssue::error(
                        ValidationErrorKind::MissingPayload,
                        "folder.validate requires a payload",
                    )],
                    warnings: vec![],
                }));
            };
            let report = orchestrator.validate(&payload.path);
            Some(DaemonMessage::Validate(ValidateResponse::from_report(
                id, report,
            )))
        }

        ClientMessage::FolderAdd { id, payload } => {
            let Some(payload) = payload else {
                return Some(DaemonMessage::Action(ActionResponse::failed(
                    id,
                    "folder.add requires a payload",
                )));
            };
            match orchestrator.add_folder(&payload.path, payload.model) {
                Ok(_) => Some(DaemonMessage::Action(ActionResponse::ok(id))),
                Err(e) => Some(DaemonMessage::Action(ActionResponse::failed(
                    id,
                    e.to_string(),
                ))),
            }
        }

        ClientMessage::FolderRemove { id, payload } => {
            let Some(payload) = payload else {
                return Some(DaemonMessage::Action(ActionResponse::failed(
                    id,
                    "folder.remove requires a payload",
                )));
            };
            match orchestrator.remove_folder(&payload.path) {
                Ok(()) => Some(DaemonMessage::Action(ActionResponse::ok(id))),
                Err(e) => Some(DaemonMessage::Action(ActionResponse::failed(
                    id,
                    e.to_string(),
                ))),
            }
        }
    }
}

/// Answer a plain HTTP request (health probes) on the sync port
async fn handle_http_request(
    stream: &mut TcpStream,
    fmdm: &Arc<FmdmService>,
    client_count: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let folder_count = fmdm.current().folders.len();
    let (status, body) = match path {
        "/health" => (
            "200 OK",
            format!(
                r#"{{"status":"healthy","folders":{},"clients":{}}}"#,
                folder_count, client_count
            ),
        ),
        _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Generate a unique client ID
fn generate_client_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).expect("RNG failed");
    hex::encode(bytes)
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
