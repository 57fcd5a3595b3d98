//! peer-terminal - Message-driven command terminal for peer-to-peer messaging
//!
//! This library provides a long-lived peer identity that receives message
//! envelopes, acknowledges them, enforces a sender allow-list and runs
//! slash commands for authorized senders, replying over the same channel.

pub mod terminal;

pub use terminal::{CommandSpec, CommandTable, Terminal, TerminalConfig};
