// Local store-and-forward relay over a Unix socket
//
// Peers connect, announce their address with a `hello` frame and exchange
// newline-delimited JSON frames. Messages for offline peers are held until
// their holding time runs out and flushed when the peer says hello.
//
// The relay is a same-user transport. Its socket is restricted to the owner
// and a `hello` must carry the seed its address derives from, so the relay
// sees every peer's seed. Addresses are not authenticated beyond that check;
// do not expose the socket to other users.

use crate::terminal::transport::{
    ClientIdentity, Connector, InboundMessage, NodeInfo, SendOptions, Transport, TransportError,
    TransportEvent,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Frames exchanged between the relay and its peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Peer announcing its address, with the seed and identifier it derives from
    Hello {
        address: String,
        #[serde(default)]
        identifier: String,
        #[serde(default)]
        seed: String,
    },
    Welcome { node: NodeInfo },
    Refused { reason: String },
    /// Peer asking the relay to forward a payload
    Send {
        dest: String,
        payload: String,
        msg_holding_seconds: u64,
    },
    /// Relay handing a payload to its recipient
    Deliver { src: String, payload: String },
}

impl RelayFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Held messages kept per offline recipient; the oldest are dropped first
pub const MAX_HELD_PER_PEER: usize = 1000;

/// A message waiting for an offline recipient
#[derive(Debug, Clone)]
struct HeldMessage {
    src: String,
    payload: String,
    expires_at: Instant,
}

impl HeldMessage {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Routing table and held messages shared by all relay connections
#[derive(Clone, Default)]
struct RelayHub {
    peers: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<RelayFrame>>>>,
    held: Arc<RwLock<HashMap<String, VecDeque<HeldMessage>>>>,
}

impl RelayHub {
    /// Register a peer, handing back its held messages. Fails if the address is taken.
    async fn register(
        &self,
        address: &str,
        tx: mpsc::UnboundedSender<RelayFrame>,
    ) -> Option<Vec<HeldMessage>> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(address) {
            return None;
        }
        peers.insert(address.to_string(), tx);

        let held = self.held.write().await.remove(address).unwrap_or_default();
        Some(held.into_iter().filter(|m| !m.is_expired()).collect())
    }

    async fn unregister(&self, address: &str) {
        self.peers.write().await.remove(address);
    }

    async fn route(&self, src: &str, dest: &str, payload: String, msg_holding_seconds: u64) {
        let frame = RelayFrame::Deliver {
            src: src.to_string(),
            payload,
        };

        let undelivered = match self.peers.read().await.get(dest) {
            Some(tx) => tx.send(frame).err().map(|e| e.0),
            None => Some(frame),
        };

        if let Some(RelayFrame::Deliver { src, payload }) = undelivered {
            self.hold(dest, src, payload, msg_holding_seconds).await;
        }
    }

    async fn hold(&self, dest: &str, src: String, payload: String, msg_holding_seconds: u64) {
        if msg_holding_seconds == 0 {
            tracing::debug!("Dropping message for offline peer {}", dest);
            return;
        }

        let mut held = self.held.write().await;
        held.retain(|_, queue| {
            queue.retain(|m| !m.is_expired());
            !queue.is_empty()
        });

        let queue = held.entry(dest.to_string()).or_default();
        while queue.len() >= MAX_HELD_PER_PEER {
            queue.pop_front();
        }
        queue.push_back(HeldMessage {
            src,
            payload,
            expires_at: Instant::now() + Duration::from_secs(msg_holding_seconds),
        });
        tracing::debug!("Holding message for {} ({} queued)", dest, queue.len());
    }

    /// Number of recipients with messages waiting
    async fn held_peers(&self) -> usize {
        self.held.read().await.len()
    }

    async fn held_count(&self, dest: &str) -> usize {
        self.held
            .read()
            .await
            .get(dest)
            .map(|q| q.iter().filter(|m| !m.is_expired()).count())
            .unwrap_or(0)
    }
}

/// A bound relay, ready to run
pub struct Relay {
    listener: UnixListener,
    socket_path: PathBuf,
    hub: RelayHub,
}

impl Relay {
    /// Bind the relay socket, replacing a stale one. Only the owner may connect.
    pub fn bind(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind relay socket {:?}", socket_path))?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict relay socket {:?}", socket_path))?;

        tracing::info!("Relay listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
            hub: RelayHub::default(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of unexpired messages held for `address`
    pub async fn held_count(&self, address: &str) -> usize {
        self.hub.held_count(address).await
    }

    /// Accept peers until `shutdown_rx` fires or its sender is dropped
    pub async fn run(self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) -> Result<()> {
        let node = NodeInfo {
            addr: self.socket_path.display().to_string(),
            id: "relay".to_string(),
            ..Default::default()
        };

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let hub = self.hub.clone();
                            let node = node.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_peer(stream, hub, node).await {
                                    tracing::warn!("Relay peer error: {:#}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Relay shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Bind and run a relay at `socket_path` until shutdown
pub async fn run_relay(
    socket_path: impl Into<PathBuf>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    Relay::bind(socket_path)?.run(shutdown_rx).await
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &RelayFrame) -> Result<()> {
    let bytes = frame.to_bytes().context("Failed to encode relay frame")?;
    writer
        .write_all(&bytes)
        .await
        .context("Failed to write relay frame")
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<RelayFrame>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match RelayFrame::from_bytes(trimmed.as_bytes()) {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => tracing::warn!("Failed to parse relay frame: {}", e),
        }
    }
}

/// Whether `seed` and `identifier` derive `address`
fn owns_address(address: &str, identifier: &str, seed: &str) -> bool {
    !seed.is_empty()
        && ClientIdentity::new(seed)
            .with_identifier(identifier)
            .address()
            == address
}

fn frame_kind(frame: &RelayFrame) -> &'static str {
    match frame {
        RelayFrame::Hello { .. } => "hello",
        RelayFrame::Welcome { .. } => "welcome",
        RelayFrame::Refused { .. } => "refused",
        RelayFrame::Send { .. } => "send",
        RelayFrame::Deliver { .. } => "deliver",
    }
}

/// Serve one peer connection from hello to EOF
async fn handle_peer(stream: UnixStream, hub: RelayHub, node: NodeInfo) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let address = match read_frame(&mut reader).await? {
        Some(RelayFrame::Hello {
            address,
            identifier,
            seed,
        }) => {
            if address.is_empty() || !owns_address(&address, &identifier, &seed) {
                tracing::warn!("Refusing peer claiming {:?}", address);
                let reason = format!("seed does not match address {:?}", address);
                write_frame(&mut write_half, &RelayFrame::Refused { reason }).await?;
                return Ok(());
            }
            address
        }
        Some(other) => {
            let reason = format!("expected hello, got {}", frame_kind(&other));
            write_frame(&mut write_half, &RelayFrame::Refused { reason }).await?;
            return Ok(());
        }
        None => return Ok(()),
    };

    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();
    let Some(held) = hub.register(&address, outgoing_tx.clone()).await else {
        tracing::warn!("Refusing duplicate peer {}", address);
        let reason = format!("address {} is already connected", address);
        write_frame(&mut write_half, &RelayFrame::Refused { reason }).await?;
        return Ok(());
    };

    tracing::info!("Peer {} connected ({} held messages)", address, held.len());
    let _ = outgoing_tx.send(RelayFrame::Welcome { node });
    for message in held {
        let _ = outgoing_tx.send(RelayFrame::Deliver {
            src: message.src,
            payload: message.payload,
        });
    }
    drop(outgoing_tx);

    let write_task = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    let result = async {
        while let Some(frame) = read_frame(&mut reader).await? {
            match frame {
                RelayFrame::Send {
                    dest,
                    payload,
                    msg_holding_seconds,
                } => hub.route(&address, &dest, payload, msg_holding_seconds).await,
                other => {
                    tracing::debug!("Ignoring {} frame from {}", frame_kind(&other), address)
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    hub.unregister(&address).await;
    write_task.abort();
    tracing::info!("Peer {} disconnected", address);

    result
}

/// Opens transport handles through a relay socket
#[derive(Debug, Clone)]
pub struct RelayConnector {
    pub socket_path: PathBuf,
}

impl RelayConnector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl Connector for RelayConnector {
    async fn open(
        &self,
        identity: &ClientIdentity,
    ) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let address = identity.address();
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        outgoing_tx
            .send(RelayFrame::Hello {
                address: address.clone(),
                identifier: identity.identifier.clone(),
                seed: identity.seed.clone(),
            })
            .map_err(|_| TransportError::Closed)?;

        let writer = tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    tracing::warn!("Relay write failed: {:#}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                let event = match read_frame(&mut reader).await {
                    Ok(Some(RelayFrame::Welcome { node })) => TransportEvent::Connected(node),
                    Ok(Some(RelayFrame::Refused { reason })) => TransportEvent::ConnectFailed(reason),
                    Ok(Some(RelayFrame::Deliver { src, payload })) => {
                        TransportEvent::Message(InboundMessage::text(src, payload))
                    }
                    Ok(Some(other)) => {
                        tracing::debug!("Ignoring relay frame: {:?}", other);
                        continue;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Relay read failed: {:#}", e);
                        break;
                    }
                };

                if events_tx.send(event).is_err() {
                    break;
                }
            }
        });

        let transport: Arc<dyn Transport> = Arc::new(RelayTransport {
            address,
            outgoing: outgoing_tx,
            tasks: std::sync::Mutex::new(vec![writer, reader]),
        });

        Ok((transport, events_rx))
    }
}

/// Handle on a relay connection
pub struct RelayTransport {
    address: String,
    outgoing: mpsc::UnboundedSender<RelayFrame>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl Transport for RelayTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(
        &self,
        dest: &str,
        payload: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.outgoing
            .send(RelayFrame::Send {
                dest: dest.to_string(),
                payload: payload.to_string(),
                msg_holding_seconds: options.msg_holding_seconds,
            })
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}
