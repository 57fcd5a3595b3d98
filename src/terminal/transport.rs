// Transport seam between the terminal and the messaging overlay
//
// The overlay itself (addressing, routing, encryption) lives behind the
// `Connector` and `Transport` traits. This crate ships an in-process network
// (`memory`) and a local Unix socket relay (`relay`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default message holding duration: 100 days
pub const DEFAULT_MSG_HOLDING_SECONDS: u64 = 8_640_000;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("transport closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Identity parameters for opening a transport handle
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Secret key material
    pub seed: String,
    /// Optional sub-address label
    pub identifier: String,
    pub num_sub_clients: u32,
    pub original_client: bool,
}

impl ClientIdentity {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            identifier: String::new(),
            num_sub_clients: 4,
            original_client: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Peer address derived from the seed, prefixed by the identifier if set
    pub fn address(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        let key = hex::encode(hasher.finalize());

        if self.identifier.is_empty() {
            key
        } else {
            format!("{}.{}", self.identifier, key)
        }
    }
}

/// Routing node the transport attached to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeInfo {
    pub addr: String,
    pub id: String,
    pub pubkey: String,
    pub rpc_addr: String,
    pub sdp: String,
}

/// Per-send options handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub no_reply: bool,
    /// How long the overlay may hold the message for an offline recipient
    pub msg_holding_seconds: u64,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            no_reply: true,
            msg_holding_seconds: DEFAULT_MSG_HOLDING_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

/// A message delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender address
    pub src: String,
    pub payload: Payload,
}

impl InboundMessage {
    pub fn text(src: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            payload: Payload::Text(payload.into()),
        }
    }
}

/// Events emitted by an open transport handle
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected(NodeInfo),
    ConnectFailed(String),
    Message(InboundMessage),
}

/// An open handle on the overlay
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address assigned to this handle
    fn address(&self) -> &str;

    async fn send(&self, dest: &str, payload: &str, options: &SendOptions)
        -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens transport handles for an identity
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a handle. Connection success or failure is reported as the first
    /// lifecycle event on the returned receiver.
    async fn open(
        &self,
        identity: &ClientIdentity,
    ) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_address() {
        let identity = ClientIdentity::new("seed-a");
        let address = identity.address();

        assert_eq!(address.len(), 64);
        assert!(address.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(address, ClientIdentity::new("seed-a").address());
        assert_ne!(address, ClientIdentity::new("seed-b").address());

        let labelled = identity.with_identifier("bot");
        assert_eq!(labelled.address(), format!("bot.{}", address));
    }

    #[test]
    fn test_send_options_default() {
        let options = SendOptions::default();
        assert!(options.no_reply);
        assert_eq!(options.msg_holding_seconds, 8_640_000);
    }
}
