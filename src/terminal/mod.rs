// Message-driven command terminal
//
// Inbound envelopes from the transport are classified, acknowledged,
// checked against the sender allow-list and, when they carry a slash
// command, parsed and dispatched to a registered handler whose output is
// sent back to the sender.

pub mod envelope;
pub mod error;
pub mod transport;
pub mod memory;
pub mod relay;
pub mod sender;
pub mod auth;
pub mod profile;
pub mod dispatch;
pub mod router;
pub mod connection;
pub mod config;
pub mod service;
pub mod cli;
pub mod commands;

pub use envelope::{decode, encode, Body, ContactProfile, Envelope};
pub use error::{Result, TerminalError};
pub use transport::{
    ClientIdentity, Connector, InboundMessage, NodeInfo, Payload, SendOptions, Transport,
    TransportError, TransportEvent,
};
pub use memory::MemoryNetwork;
pub use relay::{run_relay, Relay, RelayConnector};
pub use sender::Replier;
pub use auth::{AuthorizationGate, AuthorizedAddresses};
pub use profile::{ProfileDescriptor, ProfileResponder};
pub use dispatch::{CommandDispatcher, CommandSpec, CommandTable, ParserOptions};
pub use router::{MessageRouter, Outcome};
pub use connection::{ConnectInfo, ConnectionEvents, ConnectionManager, ConnectionState};
pub use config::TerminalConfig;
pub use service::Terminal;
pub use cli::{TerminalCli, TerminalCommand};
pub use commands::{builtin_commands, execute_command};
