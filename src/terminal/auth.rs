// Sender allow-list and the authorization gate

use crate::terminal::sender::Replier;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Written when the allow-list file does not exist yet
pub const AUTHORIZED_TEMPLATE: &str = "# Authorized peer addresses
# One address per line
# Example addresses:
# 77dba12e1b8cb518ae1ea9b1d872098f1a19856abc4594601416adc65963df61
";

/// Called with the sender address when a sender is denied
pub type DenialHook = Arc<dyn Fn(String, Replier) -> BoxFuture<'static, ()> + Send + Sync>;

/// Immutable set of peer addresses allowed to issue commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedAddresses {
    addresses: HashSet<String>,
}

impl AuthorizedAddresses {
    /// Parse one address per line, skipping blank and `#` lines
    pub fn parse(content: &str) -> Self {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Load the allow-list, creating a template file if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read authorized addresses from {:?}", path))?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .context("Failed to create authorized addresses directory")?;
            }
            std::fs::write(path, AUTHORIZED_TEMPLATE)
                .with_context(|| format!("Failed to create {:?}", path))?;
            tracing::info!("Created authorized addresses file at {:?}", path);
            AUTHORIZED_TEMPLATE.to_string()
        };

        let addresses = Self::parse(&content);
        tracing::info!("Loaded {} authorized addresses", addresses.len());
        Ok(addresses)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl FromIterator<String> for AuthorizedAddresses {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

/// Decides whether a sender may issue commands
pub struct AuthorizationGate {
    addresses: AuthorizedAddresses,
    on_denied: Option<DenialHook>,
}

impl AuthorizationGate {
    pub fn new(addresses: AuthorizedAddresses) -> Self {
        Self {
            addresses,
            on_denied: None,
        }
    }

    /// Replace the standard denial reply with `hook`
    pub fn with_denial_hook(mut self, hook: DenialHook) -> Self {
        self.set_denial_hook(hook);
        self
    }

    pub fn set_denial_hook(&mut self, hook: DenialHook) {
        self.on_denied = Some(hook);
    }

    /// An empty allow-list denies everyone.
    pub fn is_authorized(&self, address: &str) -> bool {
        !self.addresses.is_empty() && self.addresses.contains(address)
    }

    pub fn denial_hook(&self) -> Option<&DenialHook> {
        self.on_denied.as_ref()
    }

    pub fn addresses(&self) -> &AuthorizedAddresses {
        &self.addresses
    }
}
