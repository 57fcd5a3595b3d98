// Outbound replies and the acknowledgment protocol

use crate::terminal::envelope::{encode, ContactProfile, Envelope};
use crate::terminal::transport::{SendOptions, Transport, TransportError};
use std::sync::Arc;

/// Render the text of an error reply
pub fn format_error(message: &str) -> String {
    format!("> ⚠️ **Error**: {}", message)
}

/// Reply-capable handle passed to the router, command builders and handlers
#[derive(Clone)]
pub struct Replier {
    transport: Arc<dyn Transport>,
    options: SendOptions,
}

impl Replier {
    pub fn new(transport: Arc<dyn Transport>, options: SendOptions) -> Self {
        Self { transport, options }
    }

    /// Our own address on the overlay
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Encode and send an envelope
    pub async fn send_envelope(&self, dest: &str, envelope: &Envelope) -> Result<(), TransportError> {
        let payload = encode(envelope);
        if payload.is_empty() {
            return Err(TransportError::Protocol(format!(
                "envelope {} could not be encoded",
                envelope.id
            )));
        }

        self.transport.send(dest, &payload, &self.options).await
    }

    /// Send a command result as plain text
    pub async fn send_result(&self, dest: &str, message: impl Into<String>) -> Result<(), TransportError> {
        self.send_envelope(dest, &Envelope::text(message)).await
    }

    pub async fn send_error(&self, dest: &str, message: &str) -> Result<(), TransportError> {
        self.send_envelope(dest, &Envelope::text(format_error(message)))
            .await
    }

    pub async fn send_receipt(&self, dest: &str, msg_id: &str) -> Result<(), TransportError> {
        self.send_envelope(dest, &Envelope::receipt(msg_id)).await
    }

    pub async fn send_read(&self, dest: &str, msg_id: &str) -> Result<(), TransportError> {
        self.send_envelope(dest, &Envelope::read(vec![msg_id.to_string()]))
            .await
    }

    pub async fn send_contact_profile(
        &self,
        dest: &str,
        profile: ContactProfile,
    ) -> Result<(), TransportError> {
        self.send_envelope(dest, &Envelope::contact(profile)).await
    }

    /// Send a receipt and then a read acknowledgment for `msg_id`.
    ///
    /// Best-effort: failures are logged and never returned.
    pub async fn acknowledge(&self, dest: &str, msg_id: &str) {
        let result = async {
            self.send_receipt(dest, msg_id).await?;
            self.send_read(dest, msg_id).await
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Error sending receipt for {} to {}: {}", msg_id, dest, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::envelope::{decode, Body};
    use crate::terminal::memory::MemoryNetwork;
    use crate::terminal::transport::{Payload, TransportEvent};

    #[tokio::test]
    async fn test_acknowledge_order() {
        let network = MemoryNetwork::new();
        let (terminal, _rx) = network.join("terminal").await;
        let (_peer, mut peer_rx) = network.join("peer").await;

        let replier = Replier::new(terminal, SendOptions::default());
        replier.acknowledge("peer", "msg-1").await;

        let mut bodies = Vec::new();
        for _ in 0..2 {
            if let Some(TransportEvent::Message(msg)) = peer_rx.recv().await {
                if let Payload::Text(raw) = msg.payload {
                    bodies.push(decode(&raw).unwrap().body);
                }
            }
        }

        assert_eq!(
            bodies,
            vec![
                Body::Receipt {
                    target_id: "msg-1".to_string()
                },
                Body::Read {
                    read_ids: vec!["msg-1".to_string()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_acknowledge_swallows_failures() {
        let network = MemoryNetwork::new();
        let (terminal, _rx) = network.join("terminal").await;

        let replier = Replier::new(terminal, SendOptions::default());
        // Unknown destination: logged, not propagated
        replier.acknowledge("nobody", "msg-1").await;
        assert!(replier.send_result("nobody", "x").await.is_err());
    }

    #[test]
    fn test_format_error() {
        assert_eq!(format_error("bad arg"), "> ⚠️ **Error**: bad arg");
    }
}
