// Connection lifecycle for the terminal's peer identity

use crate::terminal::error::{Result, TerminalError};
use crate::terminal::transport::{
    ClientIdentity, Connector, InboundMessage, NodeInfo, Transport, TransportEvent,
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

pub type MessageCallback =
    Arc<dyn Fn(Arc<dyn Transport>, InboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ConnectCallback = Arc<dyn Fn(&str, &NodeInfo) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&TerminalError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Callbacks fired by the connection manager
#[derive(Clone, Default)]
pub struct ConnectionEvents {
    pub on_message: Option<MessageCallback>,
    pub on_connect: Option<ConnectCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Result of a successful connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Address assigned to the terminal
    pub address: String,
    pub node: NodeInfo,
}

/// Owns the transport handle for one peer identity
pub struct ConnectionManager {
    identity: ClientIdentity,
    connector: Arc<dyn Connector>,
    events: ConnectionEvents,
    state: RwLock<ConnectionState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Fails when the identity carries no seed
    pub fn new(
        identity: ClientIdentity,
        connector: Arc<dyn Connector>,
        events: ConnectionEvents,
    ) -> Result<Self> {
        if identity.seed.trim().is_empty() {
            return Err(TerminalError::MissingSeed);
        }

        Ok(Self {
            identity,
            connector,
            events,
            state: RwLock::new(ConnectionState::Disconnected),
            transport: RwLock::new(None),
            forwarder: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// The open transport handle, if connected
    pub async fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().await.clone()
    }

    /// Open the transport and wait until it reports success or failure
    pub async fn connect(&self) -> Result<ConnectInfo> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(TerminalError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        tracing::info!("Connecting as {}", self.identity.address());

        let (transport, mut events_rx) = match self.connector.open(&self.identity).await {
            Ok(opened) => opened,
            Err(e) => return Err(self.fail_connect(e.to_string()).await),
        };

        let node = loop {
            match events_rx.recv().await {
                Some(TransportEvent::Connected(node)) => break node,
                Some(TransportEvent::ConnectFailed(reason)) => {
                    let _ = transport.close().await;
                    return Err(self.fail_connect(reason).await);
                }
                Some(TransportEvent::Message(msg)) => {
                    tracing::debug!("Dropping message from {} received before connect", msg.src);
                }
                None => {
                    return Err(self
                        .fail_connect("transport closed before connecting".to_string())
                        .await);
                }
            }
        };

        let address = transport.address().to_string();
        *self.transport.write().await = Some(transport.clone());
        *self.state.write().await = ConnectionState::Connected;

        let forwarder = self.spawn_forwarder(transport, events_rx);
        *self.forwarder.lock().await = Some(forwarder);

        tracing::info!("Connected as {} via node {}", address, node.addr);
        if let Some(on_connect) = &self.events.on_connect {
            on_connect(&address, &node);
        }

        Ok(ConnectInfo { address, node })
    }

    async fn fail_connect(&self, reason: String) -> TerminalError {
        *self.state.write().await = ConnectionState::Disconnected;

        let error = TerminalError::ConnectFailed(reason);
        tracing::error!("{}", error);
        if let Some(on_error) = &self.events.on_error {
            on_error(&error);
        }
        error
    }

    /// Deliver each inbound message to the callback as its own task, in order
    fn spawn_forwarder(
        &self,
        transport: Arc<dyn Transport>,
        mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let on_message = self.events.on_message.clone();

        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    TransportEvent::Message(msg) => {
                        if let Some(on_message) = &on_message {
                            tokio::spawn(on_message(transport.clone(), msg));
                        }
                    }
                    other => tracing::debug!("Ignoring transport event: {:?}", other),
                }
            }
            tracing::debug!("Transport event stream ended");
        })
    }

    /// Close the transport. Fails with `NotConnected` unless connected, in
    /// which case nothing changes.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Connected {
                return Err(TerminalError::NotConnected);
            }
            *state = ConnectionState::Disconnected;
        }

        if let Some(forwarder) = self.forwarder.lock().await.take() {
            forwarder.abort();
        }

        let closed = match self.transport.write().await.take() {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };

        tracing::info!("Disconnected");
        if let Some(on_disconnect) = &self.events.on_disconnect {
            on_disconnect();
        }

        closed.map_err(TerminalError::from)
    }
}
