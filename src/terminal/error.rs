// Error types for the terminal

use crate::terminal::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    /// No seed was supplied for the peer identity
    #[error("seed is required")]
    MissingSeed,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("already connected or connecting")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, TerminalError>;
