// In-process overlay connecting peers through channels

use crate::terminal::transport::{
    ClientIdentity, Connector, InboundMessage, NodeInfo, SendOptions, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Shared registry of in-process peers
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<TransportEvent>>>>,
    refuse: Arc<AtomicBool>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `open` calls report a connect failure
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Attach a peer at `address` directly, without a lifecycle event
    pub async fn join(
        &self,
        address: &str,
    ) -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().await.insert(address.to_string(), tx);

        let transport = Arc::new(MemoryTransport {
            address: address.to_string(),
            network: self.clone(),
            attached: true,
        });

        (transport, rx)
    }

    /// Deliver a message to `dest` as if it came from the overlay
    pub async fn inject(&self, dest: &str, message: InboundMessage) -> Result<(), TransportError> {
        let peers = self.peers.read().await;
        let tx = peers
            .get(dest)
            .ok_or_else(|| TransportError::UnknownPeer(dest.to_string()))?;

        tx.send(TransportEvent::Message(message))
            .map_err(|_| TransportError::Closed)
    }

    pub async fn is_online(&self, address: &str) -> bool {
        self.peers.read().await.contains_key(address)
    }

    async fn leave(&self, address: &str) {
        self.peers.write().await.remove(address);
    }
}

#[async_trait]
impl Connector for MemoryNetwork {
    async fn open(
        &self,
        identity: &ClientIdentity,
    ) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let address = identity.address();

        if self.refuse.load(Ordering::SeqCst) || self.is_online(&address).await {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(TransportEvent::ConnectFailed(format!(
                "memory network refused {}",
                address
            )));
            let transport: Arc<dyn Transport> = Arc::new(MemoryTransport {
                address,
                network: self.clone(),
                attached: false,
            });
            return Ok((transport, rx));
        }

        let (handle, rx) = self.join(&address).await;
        let transport: Arc<dyn Transport> = handle;
        if let Some(tx) = self.peers.read().await.get(&address) {
            let _ = tx.send(TransportEvent::Connected(NodeInfo {
                addr: "memory".to_string(),
                id: "memory-node".to_string(),
                ..Default::default()
            }));
        }

        Ok((transport, rx))
    }
}

/// Handle for one in-process peer
pub struct MemoryTransport {
    address: String,
    network: MemoryNetwork,
    /// False for handles whose connection was refused
    attached: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(
        &self,
        dest: &str,
        payload: &str,
        _options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.network
            .inject(dest, InboundMessage::text(self.address.clone(), payload))
            .await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.attached {
            self.network.leave(&self.address).await;
        }
        Ok(())
    }
}
