//! Client sync adapter
//!
//! One WebSocket connection to the daemon, maintained for the life of the
//! adapter. Outbound commands are correlated to responses by a
//! client-generated id; inbound `fmdm.update` pushes replace the local
//! snapshot wholesale. When the connection drops the adapter reconnects
//! automatically with exponential backoff and re-runs the handshake; pending
//! requests fail fast rather than dangling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::messages::{
    ActionResponse, AddPayload, ClientMessage, DaemonMessage, DaemonPush, PathPayload,
    ValidateResponse,
};
use scout_core::types::{ClientKind, Fmdm};

/// How long a command waits for its response before the pending entry is
/// garbage-collected
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing the WebSocket connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound frames buffered before the writer drains them
const OUTBOUND_QUEUE: usize = 64;

/// Snapshot updates buffered per subscriber
const UPDATE_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnection configuration
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    pub enabled: bool,
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 0, // Unlimited
        }
    }
}

/// Connection status as seen by the adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Adapter errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("not connected to the daemon")]
    NotConnected,

    #[error("connection lost before the response arrived")]
    ConnectionLost,

    #[error("timed out waiting for the daemon")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

struct AdapterInner {
    url: String,
    kind: ClientKind,
    reconnect: ReconnectConfig,
    /// Last received snapshot; replaced wholesale on every push
    snapshot: RwLock<Option<Arc<Fmdm>>>,
    /// In-flight requests by correlation id
    pending: DashMap<String, oneshot::Sender<DaemonMessage>>,
    /// Writer queue of the current connection, when connected
    out_tx: RwLock<Option<mpsc::Sender<String>>>,
    updates: broadcast::Sender<Arc<Fmdm>>,
    status: RwLock<ConnectionStatus>,
    shutdown: CancellationToken,
}

/// Handle to a daemon sync connection
pub struct ClientSyncAdapter {
    inner: Arc<AdapterInner>,
}

impl ClientSyncAdapter {
    /// Connect to a daemon with default reconnect behavior.
    ///
    /// The first connection is established eagerly so callers fail fast when
    /// no daemon is listening.
    pub async fn connect(
        url: impl Into<String>,
        kind: ClientKind,
    ) -> Result<Self, ClientError> {
        Self::connect_with(url, kind, ReconnectConfig::default()).await
    }

    /// Connect with custom reconnect behavior
    pub async fn connect_with(
        url: impl Into<String>,
        kind: ClientKind,
        reconnect: ReconnectConfig,
    ) -> Result<Self, ClientError> {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let inner = Arc::new(AdapterInner {
            url: url.into(),
            kind,
            reconnect,
            snapshot: RwLock::new(None),
            pending: DashMap::new(),
            out_tx: RwLock::new(None),
            updates,
            status: RwLock::new(ConnectionStatus::Connecting),
            shutdown: CancellationToken::new(),
        });

        let first = AdapterInner::establish(&inner).await?;
        let runner = inner.clone();
        tokio::spawn(async move {
            AdapterInner::run(runner, first).await;
        });

        Ok(Self { inner })
    }

    /// The last received snapshot, if any has arrived yet
    pub fn snapshot(&self) -> Option<Arc<Fmdm>> {
        self.inner.snapshot.read().clone()
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Fmdm>> {
        self.inner.updates.subscribe()
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.read()
    }

    /// Wait until a snapshot is available (the daemon pushes one right
    /// after the handshake)
    pub async fn wait_for_snapshot(&self, wait: Duration) -> Result<Arc<Fmdm>, ClientError> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        let mut rx = self.subscribe();
        // The push may have landed between the check and the subscribe
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        match timeout(wait, rx.recv()).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Dry-run the folder validation rules for a path
    pub async fn validate(&self, path: impl Into<String>) -> Result<ValidateResponse, ClientError> {
        let id = generate_request_id();
        let msg = ClientMessage::FolderValidate {
            id: id.clone(),
            payload: Some(PathPayload { path: path.into() }),
        };
        match self.inner.request(id, msg).await? {
            DaemonMessage::Validate(r) => Ok(r),
            other => Err(ClientError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Add a folder to the monitored set
    pub async fn add_folder(
        &self,
        path: impl Into<String>,
        model: Option<String>,
    ) -> Result<ActionResponse, ClientError> {
        let id = generate_request_id();
        let msg = ClientMessage::FolderAdd {
            id: id.clone(),
            payload: Some(AddPayload {
                path: path.into(),
                model,
            }),
        };
        match self.inner.request(id, msg).await? {
            DaemonMessage::Action(r) => Ok(r),
            other => Err(ClientError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Remove a folder from the monitored set
    pub async fn remove_folder(
        &self,
        path: impl Into<String>,
    ) -> Result<ActionResponse, ClientError> {
        let id = generate_request_id();
        let msg = ClientMessage::FolderRemove {
            id: id.clone(),
            payload: Some(PathPayload { path: path.into() }),
        };
        match self.inner.request(id, msg).await? {
            DaemonMessage::Action(r) => Ok(r),
            other => Err(ClientError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Round-trip a ping, returning the measured latency
    pub async fn ping(&self) -> Result<Duration, ClientError> {
        let id = generate_request_id();
        let started = Instant::now();
        let msg = ClientMessage::Ping { id: id.clone() };
        match self.inner.request(id, msg).await? {
            DaemonMessage::Push(DaemonPush::Pong { .. }) => Ok(started.elapsed()),
            other => Err(ClientError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Close the connection and stop reconnecting
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for ClientSyncAdapter {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl AdapterInner {
    async fn establish(inner: &Arc<Self>) -> Result<WsStream, ClientError> {
        debug!("Connecting to daemon at {}", inner.url);
        let result = timeout(CONNECT_TIMEOUT, connect_async(inner.url.as_str())).await;
        match result {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(ClientError::Connect(e.to_string())),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Maintain the connection for the adapter's lifetime
    async fn run(inner: Arc<Self>, first: WsStream) {
        let mut next = Some(first);
        let mut attempt: u32 = 0;

        loop {
            let ws = match next.take() {
                Some(ws) => ws,
                None => {
                    if !inner.reconnect.enabled || inner.shutdown.is_cancelled() {
                        break;
                    }
                    if inner.reconnect.max_attempts > 0
                        && attempt >= inner.reconnect.max_attempts
                    {
                        warn!("Giving up after {} reconnect attempts", attempt);
                        break;
                    }

                    let delay = backoff_delay(&inner.reconnect, attempt);
                    debug!("Reconnecting in {:?} (attempt {})", delay, attempt + 1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = inner.shutdown.cancelled() => break,
                    }
                    attempt += 1;

                    *inner.status.write() = ConnectionStatus::Connecting;
                    match Self::establish(&inner).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            debug!("Reconnect attempt failed: {}", e);
                            continue;
                        }
                    }
                }
            };

            attempt = 0;
            Self::session(&inner, ws).await;

            // Connection is gone: fail in-flight requests immediately
            *inner.status.write() = ConnectionStatus::Disconnected;
            inner.out_tx.write().take();
            inner.pending.clear();

            if inner.shutdown.is_cancelled() {
                break;
            }
            warn!("Connection to daemon lost");
        }

        *inner.status.write() = ConnectionStatus::Disconnected;
    }

    /// Drive one established connection until it drops
    async fn session(inner: &Arc<Self>, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();

        // connecting → handshaken: announce who we are
        let init = ClientMessage::ConnectionInit {
            client_type: inner.kind,
        };
        let frame = match init.to_json() {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to encode handshake: {}", e);
                return;
            }
        };
        if sink.send(Message::Text(frame)).await.is_err() {
            return;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        *inner.out_tx.write() = Some(out_tx);
        *inner.status.write() = ConnectionStatus::Connected;
        info!("Connected to daemon at {}", inner.url);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => inner.handle_frame(&text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {:?}", e);
                        break;
                    }
                },
            }
        }

        writer.abort();
    }

    /// Route one inbound frame: snapshot pushes replace local state,
    /// responses complete their pending request.
    fn handle_frame(&self, text: &str) {
        let msg = match DaemonMessage::from_json(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Unparseable frame from daemon: {}", e);
                return;
            }
        };

        match msg {
            DaemonMessage::Push(DaemonPush::FmdmUpdate { fmdm }) => {
                let snapshot = Arc::new(fmdm);
                *self.snapshot.write() = Some(snapshot.clone());
                let _ = self.updates.send(snapshot);
            }
            other => {
                let id = other.correlation_id().map(str::to_string);
                match id {
                    Some(id) => match self.pending.remove(&id) {
                        Some((_, tx)) => {
                            let _ = tx.send(other);
                        }
                        None => debug!("Response for unknown or expired request {}", id),
                    },
                    None => debug!("Push without correlation id ignored"),
                }
            }
        }
    }

    /// Send a command and wait for its correlated response
    async fn request(&self, id: String, msg: ClientMessage) -> Result<DaemonMessage, ClientError> {
        let tx = self
            .out_tx
            .read()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let frame = msg
            .to_json()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.insert(id.clone(), resp_tx);

        if tx.send(frame).await.is_err() {
            self.pending.remove(&id);
            return Err(ClientError::ConnectionLost);
        }

        match timeout(REQUEST_TIMEOUT, resp_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                // Garbage-collect the pending entry on timeout
                self.pending.remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }
}

/// Exponential backoff, capped at the configured maximum
fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(16));
    config
        .initial_delay
        .saturating_mul(multiplier.min(u32::MAX as u64) as u32)
        .min(config.max_delay)
}

/// Generate a unique request ID
fn generate_request_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).expect("RNG failed");
    hex::encode(bytes)
}
