// Construction-time configuration for a terminal

use crate::terminal::dispatch::ParserOptions;
use crate::terminal::error::{Result, TerminalError};
use crate::terminal::profile::ProfileDescriptor;
use crate::terminal::transport::{ClientIdentity, SendOptions, DEFAULT_MSG_HOLDING_SECONDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default allow-list file name
pub const AUTHORIZED_FILE: &str = "authorized";

/// Terminal configuration, usually read from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminalConfig {
    /// Secret key material for the peer identity
    pub seed: String,
    pub identifier: String,
    pub num_sub_clients: u32,
    pub original_client: bool,
    /// Allow-list location (default: `authorized` in the base directory)
    pub authorize_path: Option<PathBuf>,
    pub profile: ProfileDescriptor,
    /// Command parser presentation
    pub commands: ParserOptions,
    pub msg_holding_seconds: u64,
    /// Directory that relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            seed: String::new(),
            identifier: String::new(),
            num_sub_clients: 4,
            original_client: true,
            authorize_path: None,
            profile: ProfileDescriptor::default(),
            commands: ParserOptions::default(),
            msg_holding_seconds: DEFAULT_MSG_HOLDING_SECONDS,
            base_dir: PathBuf::from("."),
        }
    }
}

impl TerminalConfig {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            ..Default::default()
        }
    }

    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file without validating it. Relative paths in it
    /// resolve against the file's directory.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TerminalError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config: TerminalConfig = serde_json::from_str(&content).map_err(|e| {
            TerminalError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;

        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seed.trim().is_empty() {
            return Err(TerminalError::MissingSeed);
        }
        if self.num_sub_clients == 0 {
            return Err(TerminalError::Config(
                "numSubClients must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            seed: self.seed.clone(),
            identifier: self.identifier.clone(),
            num_sub_clients: self.num_sub_clients,
            original_client: self.original_client,
        }
    }

    pub fn authorize_path(&self) -> PathBuf {
        match &self.authorize_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.base_dir.join(path),
            None => self.base_dir.join(AUTHORIZED_FILE),
        }
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            no_reply: true,
            msg_holding_seconds: self.msg_holding_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("terminal.json");
        std::fs::write(
            &path,
            r#"{
                "seed": "abc",
                "profile": {"name": "bot", "avatar": "avatar.png", "avatar_ext": "png", "version": "1"},
                "commands": {"usage": "/<cmd>"}
            }"#,
        )
        .unwrap();

        let config = TerminalConfig::load(&path).unwrap();
        assert_eq!(config.seed, "abc");
        assert_eq!(config.num_sub_clients, 4);
        assert!(config.original_client);
        assert_eq!(config.msg_holding_seconds, 8_640_000);
        assert_eq!(config.profile.name, "bot");
        assert_eq!(config.profile.avatar, Some(PathBuf::from("avatar.png")));
        assert_eq!(config.commands.usage, "/<cmd>");
        assert!(config.commands.help);
        assert_eq!(config.authorize_path(), dir.path().join("authorized"));
    }

    #[test]
    fn test_load_requires_seed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("terminal.json");
        std::fs::write(&path, r#"{"identifier": "bot"}"#).unwrap();

        assert!(matches!(
            TerminalConfig::load(&path),
            Err(TerminalError::MissingSeed)
        ));
        assert_eq!(TerminalConfig::read(&path).unwrap().identifier, "bot");
        assert!(matches!(
            TerminalConfig::load(&dir.path().join("missing.json")),
            Err(TerminalError::Config(_))
        ));
    }

    #[test]
    fn test_identity_and_paths() {
        let mut config = TerminalConfig::new("seed");
        config.identifier = "bot".to_string();
        config.authorize_path = Some(PathBuf::from("/etc/terminal/allow"));

        let identity = config.identity();
        assert!(identity.address().starts_with("bot."));
        assert_eq!(config.authorize_path(), PathBuf::from("/etc/terminal/allow"));
        assert_eq!(config.send_options().msg_holding_seconds, 8_640_000);
    }
}
