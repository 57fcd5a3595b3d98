// The terminal facade: allow-list, profile, commands and connection wired together

use crate::terminal::auth::{AuthorizationGate, AuthorizedAddresses};
use crate::terminal::config::TerminalConfig;
use crate::terminal::connection::{
    ConnectInfo, ConnectionEvents, ConnectionManager, ConnectionState,
};
use crate::terminal::dispatch::{CommandDispatcher, CommandTable};
use crate::terminal::error::{Result, TerminalError};
use crate::terminal::profile::ProfileResponder;
use crate::terminal::router::MessageRouter;
use crate::terminal::sender::Replier;
use crate::terminal::transport::{Connector, InboundMessage, NodeInfo, Transport};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// A message-driven command terminal bound to one peer identity
pub struct Terminal {
    config: TerminalConfig,
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    manager: OnceCell<ConnectionManager>,
}

impl Terminal {
    /// Build a terminal. The allow-list is read here and never again.
    pub fn new(
        config: TerminalConfig,
        connector: Arc<dyn Connector>,
        commands: CommandTable,
    ) -> Result<Self> {
        config.validate()?;

        let authorize_path = config.authorize_path();
        let addresses = match AuthorizedAddresses::load(&authorize_path) {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::error!("Failed to load authorized addresses: {:#}", e);
                AuthorizedAddresses::default()
            }
        };
        if addresses.is_empty() {
            tracing::warn!(
                "No authorized addresses in {:?}, every command will be denied",
                authorize_path
            );
        }

        let router = MessageRouter::new(
            AuthorizationGate::new(addresses),
            CommandDispatcher::new(commands, config.commands.clone()),
            ProfileResponder::new(config.profile.clone(), config.base_dir.clone()),
        );

        Ok(Self {
            config,
            connector,
            router: Arc::new(router),
            manager: OnceCell::new(),
        })
    }

    /// React to denied senders instead of sending the standard reply.
    ///
    /// Only takes effect before the first `connect`.
    pub fn on_unauthorized<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(String, Replier) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match Arc::get_mut(&mut self.router) {
            Some(router) => router.gate_mut().set_denial_hook(Arc::new(
                move |src: String, replier: Replier| -> BoxFuture<'static, ()> {
                    Box::pin(hook(src, replier))
                },
            )),
            None => tracing::warn!("Unauthorized hook ignored: terminal already connected"),
        }
        self
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// The address peers use to reach this terminal
    pub fn address(&self) -> String {
        self.config.identity().address()
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub async fn state(&self) -> ConnectionState {
        match self.manager.get() {
            Some(manager) => manager.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    pub async fn connect(&self) -> Result<ConnectInfo> {
        let manager = self
            .manager
            .get_or_try_init(|| async { self.build_manager() })
            .await?;
        manager.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self.manager.get() {
            Some(manager) => manager.disconnect().await,
            None => Err(TerminalError::NotConnected),
        }
    }

    fn build_manager(&self) -> Result<ConnectionManager> {
        let router = self.router.clone();
        let options = self.config.send_options();

        let events = ConnectionEvents {
            on_message: Some(Arc::new(
                move |transport: Arc<dyn Transport>, msg: InboundMessage| -> BoxFuture<'static, ()> {
                    let router = router.clone();
                    let replier = Replier::new(transport, options);
                    Box::pin(async move {
                        router.handle(msg, &replier).await;
                    })
                },
            )),
            on_connect: Some(Arc::new(|address: &str, node: &NodeInfo| {
                tracing::info!("Connected. Your terminal address is {}", address);
                tracing::debug!("Node: {:?}", node);
            })),
            on_disconnect: Some(Arc::new(|| {
                tracing::info!("Terminal disconnected");
            })),
            on_error: Some(Arc::new(|e: &TerminalError| {
                tracing::error!("Terminal connection error: {}", e);
            })),
        };

        ConnectionManager::new(self.config.identity(), self.connector.clone(), events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::memory::MemoryNetwork;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_new_requires_seed() {
        let result = Terminal::new(
            TerminalConfig::default(),
            Arc::new(MemoryNetwork::new()),
            CommandTable::new(),
        );
        assert!(matches!(result, Err(TerminalError::MissingSeed)));
    }

    #[tokio::test]
    async fn test_lifecycle_creates_allow_list() {
        let dir = tempdir().unwrap();
        let mut config = TerminalConfig::new("seed");
        config.base_dir = dir.path().to_path_buf();

        let network = MemoryNetwork::new();
        let terminal = Terminal::new(config, Arc::new(network.clone()), CommandTable::new()).unwrap();
        assert!(dir.path().join("authorized").exists());
        assert!(terminal.router().gate().addresses().is_empty());

        assert_eq!(terminal.state().await, ConnectionState::Disconnected);
        assert!(matches!(terminal.disconnect().await, Err(TerminalError::NotConnected)));

        let info = terminal.connect().await.unwrap();
        assert_eq!(info.address, terminal.address());
        assert!(network.is_online(&terminal.address()).await);
        assert_eq!(terminal.state().await, ConnectionState::Connected);

        terminal.disconnect().await.unwrap();
        assert_eq!(terminal.state().await, ConnectionState::Disconnected);
    }
}
