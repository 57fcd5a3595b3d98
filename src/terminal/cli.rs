// CLI for the peer-terminal binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Environment variable holding the identity seed
pub const SEED_ENV: &str = "PEER_TERMINAL_SEED";

/// Peer terminal CLI
#[derive(Debug, Parser)]
#[command(name = "peer-terminal")]
#[command(about = "Message-driven command terminal for store-and-forward peer messaging")]
pub struct TerminalCli {
    /// Log filter, e.g. `debug` or `peer_terminal=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: TerminalCommand,
}

/// Peer terminal subcommands
#[derive(Debug, Subcommand)]
pub enum TerminalCommand {
    /// Run a local relay that peers connect through
    ///
    /// The socket is restricted to the current user. Peers prove their
    /// address by sending its seed to the relay; addresses are not otherwise
    /// authenticated, so keep the relay private to one user.
    Relay {
        /// Relay socket path
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Run a terminal with the built-in commands
    ///
    /// Senders are identified by their relay address. The relay only checks
    /// that a peer holds the seed behind its address, so anyone able to
    /// use the relay socket can reach the terminal.
    Serve {
        /// JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Relay socket path
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Allow-list file (overrides authorizePath)
        #[arg(short, long)]
        authorized: Option<PathBuf>,

        /// Identity seed (overrides the config file)
        #[arg(long, env = SEED_ENV)]
        seed: Option<String>,
    },

    /// Send one text message and print the replies
    Send {
        /// Relay socket path
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Seed of the sending identity
        #[arg(long, env = SEED_ENV)]
        seed: String,

        /// Destination address
        #[arg(short, long)]
        to: String,

        /// Seconds to wait for replies
        #[arg(short, long, default_value = "5")]
        wait: u64,

        /// Message text, e.g. `/echo hello`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Generate a random seed and print its address
    Keygen {
        /// Sub-address label
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Print the address derived from a seed
    Address {
        #[arg(long, env = SEED_ENV)]
        seed: String,

        /// Sub-address label
        #[arg(short, long)]
        identifier: Option<String>,
    },
}

impl TerminalCli {
    /// Parse from command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Relay socket used when `--socket` is not given
    pub fn default_socket() -> PathBuf {
        let dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(dir).join("peer-terminal.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = TerminalCli::try_parse_from([
            "peer-terminal",
            "serve",
            "--config",
            "terminal.json",
            "--authorized",
            "allow",
        ])
        .unwrap();
        match cli.command {
            TerminalCommand::Serve {
                config, authorized, ..
            } => {
                assert_eq!(config, PathBuf::from("terminal.json"));
                assert_eq!(authorized, Some(PathBuf::from("allow")));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(TerminalCli::try_parse_from(["peer-terminal", "serve"]).is_err());
    }

    #[test]
    fn test_send_collects_text() {
        let cli = TerminalCli::try_parse_from([
            "peer-terminal",
            "--log-level",
            "debug",
            "send",
            "--seed",
            "abc",
            "--to",
            "addr",
            "/echo",
            "--loud",
            "hello",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            TerminalCommand::Send { text, wait, .. } => {
                assert_eq!(text.join(" "), "/echo --loud hello");
                assert_eq!(wait, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_socket() {
        assert!(TerminalCli::default_socket().ends_with("peer-terminal.sock"));
    }
}
