// Inbound message classification and routing

use crate::terminal::auth::AuthorizationGate;
use crate::terminal::dispatch::CommandDispatcher;
use crate::terminal::envelope::{decode, Body};
use crate::terminal::profile::ProfileResponder;
use crate::terminal::sender::Replier;
use crate::terminal::transport::{InboundMessage, Payload};
use anyhow::Result;

/// Prefix marking a text message as a command line
pub const COMMAND_PREFIX: char = '/';

/// Where a message stopped in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Sent by ourselves
    Loopback,
    Binary,
    Malformed,
    /// Receipt or read acknowledgment
    Control,
    Profile,
    /// Acknowledged non-text content
    Media,
    Group,
    Denied,
    /// Plain chat text
    Chat,
    Command,
    /// Handling failed and the sender was sent a generic error
    Failed,
}

/// Routes inbound messages through acknowledgment, authorization and dispatch
pub struct MessageRouter {
    gate: AuthorizationGate,
    dispatcher: CommandDispatcher,
    profile: ProfileResponder,
}

impl MessageRouter {
    pub fn new(gate: AuthorizationGate, dispatcher: CommandDispatcher, profile: ProfileResponder) -> Self {
        Self {
            gate,
            dispatcher,
            profile,
        }
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut AuthorizationGate {
        &mut self.gate
    }

    /// Handle one inbound message. Never fails.
    pub async fn handle(&self, message: InboundMessage, replier: &Replier) -> Outcome {
        let src = message.src.clone();

        match self.route(message, replier).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Error handling message from {}: {:#}", src, e);
                if let Err(e) = replier.send_error(&src, "Internal server error").await {
                    tracing::error!("Error sending error response to {}: {}", src, e);
                }
                Outcome::Failed
            }
        }
    }

    async fn route(&self, message: InboundMessage, replier: &Replier) -> Result<Outcome> {
        let InboundMessage { src, payload } = message;

        if src == replier.address() {
            return Ok(Outcome::Loopback);
        }

        let raw = match payload {
            Payload::Text(raw) => raw,
            Payload::Binary(_) => return Ok(Outcome::Binary),
        };

        let Some(envelope) = decode(&raw) else {
            tracing::debug!("Invalid message format from {}", src);
            return Ok(Outcome::Malformed);
        };

        if envelope.is_acknowledgment() {
            return Ok(Outcome::Control);
        }

        if let Body::Contact(request) = &envelope.body {
            tracing::info!("Received contact profile request from {}", src);
            self.profile.respond(&src, request, replier).await?;
            return Ok(Outcome::Profile);
        }

        replier.acknowledge(&src, &envelope.id).await;

        let Body::Text { content } = &envelope.body else {
            return Ok(Outcome::Media);
        };

        if envelope.is_group() {
            return Ok(Outcome::Group);
        }

        if !self.gate.is_authorized(&src) {
            tracing::warn!("Unauthorized message from {}", src);
            match self.gate.denial_hook() {
                Some(hook) => hook(src.clone(), replier.clone()).await,
                None => replier.send_error(&src, "Permission denied").await?,
            }
            return Ok(Outcome::Denied);
        }

        let Some(line) = content.strip_prefix(COMMAND_PREFIX) else {
            return Ok(Outcome::Chat);
        };

        tracing::info!("Received command from {}: {}", src, content);
        self.dispatcher.dispatch(line, &src, replier).await?;

        Ok(Outcome::Command)
    }
}
