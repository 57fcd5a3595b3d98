// Command handlers for the peer-terminal CLI and the built-in slash commands

use crate::terminal::cli::{TerminalCli, TerminalCommand};
use crate::terminal::config::TerminalConfig;
use crate::terminal::connection::{ConnectionEvents, ConnectionManager};
use crate::terminal::dispatch::{CommandSpec, CommandTable};
use crate::terminal::envelope::{decode, now_millis, Body, Envelope};
use crate::terminal::relay::{Relay, RelayConnector};
use crate::terminal::sender::Replier;
use crate::terminal::service::Terminal;
use crate::terminal::transport::{ClientIdentity, InboundMessage, Payload, SendOptions, Transport};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches};
use futures::future::BoxFuture;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Execute a peer-terminal command
pub async fn execute_command(command: TerminalCommand) -> Result<()> {
    match command {
        TerminalCommand::Relay { socket } => handle_relay(socket).await,
        TerminalCommand::Serve {
            config,
            socket,
            authorized,
            seed,
        } => handle_serve(config, socket, authorized, seed).await,
        TerminalCommand::Send {
            socket,
            seed,
            to,
            wait,
            text,
        } => handle_send(socket, seed, to, wait, text.join(" ")).await,
        TerminalCommand::Keygen { identifier } => handle_keygen(identifier),
        TerminalCommand::Address { seed, identifier } => handle_address(seed, identifier),
    }
}

/// Commands served by `peer-terminal serve`
pub fn builtin_commands() -> CommandTable {
    CommandTable::new()
        .register(
            CommandSpec::new("echo", "Reply with the given words", echo).with_args(
                |cmd, _src, _replier| {
                    cmd.arg(
                        Arg::new("words")
                            .help("Words to echo back")
                            .num_args(1..)
                            .required(true)
                            .trailing_var_arg(true)
                            .allow_hyphen_values(true),
                    )
                },
            ),
        )
        .register(CommandSpec::new("ping", "Check that the terminal is alive", ping))
        .register(CommandSpec::new("whoami", "Show your address", whoami))
        .register(CommandSpec::new(
            "time",
            "Show the terminal clock in epoch milliseconds",
            current_time,
        ))
}

async fn echo(matches: ArgMatches, src: String, replier: Replier) -> Result<()> {
    let words: Vec<String> = matches
        .get_many::<String>("words")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    replier.send_result(&src, words.join(" ")).await?;
    Ok(())
}

async fn ping(_matches: ArgMatches, src: String, replier: Replier) -> Result<()> {
    replier.send_result(&src, "pong").await?;
    Ok(())
}

async fn whoami(_matches: ArgMatches, src: String, replier: Replier) -> Result<()> {
    replier.send_result(&src, src.as_str()).await?;
    Ok(())
}

async fn current_time(_matches: ArgMatches, src: String, replier: Replier) -> Result<()> {
    replier.send_result(&src, now_millis().to_string()).await?;
    Ok(())
}

async fn handle_relay(socket: Option<PathBuf>) -> Result<()> {
    let socket = socket.unwrap_or_else(TerminalCli::default_socket);
    let relay = Relay::bind(&socket)?;

    println!("✓ Relay listening on {:?}", relay.socket_path());
    println!("\nPress Ctrl+C to stop the relay");

    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    relay.run(shutdown_rx).await
}

async fn handle_serve(
    config_path: PathBuf,
    socket: Option<PathBuf>,
    authorized: Option<PathBuf>,
    seed: Option<String>,
) -> Result<()> {
    let mut config = TerminalConfig::read(&config_path)?;
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(authorized) = authorized {
        config.authorize_path = Some(authorized);
    }

    config.validate()?;

    let socket = socket.unwrap_or_else(TerminalCli::default_socket);
    let terminal = Terminal::new(
        config,
        Arc::new(RelayConnector::new(socket)),
        builtin_commands(),
    )?;

    let info = terminal.connect().await?;
    println!("✓ Terminal connected");
    println!("  Address: {}", info.address);
    println!("  Node: {}", info.node.addr);
    println!(
        "  Authorized senders: {}",
        terminal.router().gate().addresses().len()
    );

    println!("\nPress Ctrl+C to stop the terminal");
    tokio::signal::ctrl_c().await?;

    println!("\nStopping terminal...");
    terminal.disconnect().await?;

    Ok(())
}

async fn handle_send(
    socket: Option<PathBuf>,
    seed: String,
    to: String,
    wait: u64,
    text: String,
) -> Result<()> {
    let socket = socket.unwrap_or_else(TerminalCli::default_socket);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let events = ConnectionEvents {
        on_message: Some(Arc::new(
            move |_transport: Arc<dyn Transport>, msg: InboundMessage| -> BoxFuture<'static, ()> {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(msg);
                })
            },
        )),
        ..Default::default()
    };

    let manager = ConnectionManager::new(
        ClientIdentity::new(seed),
        Arc::new(RelayConnector::new(socket)),
        events,
    )?;
    let info = manager.connect().await?;
    let transport = manager
        .transport()
        .await
        .context("Transport closed after connecting")?;

    let request = Envelope::text(text);
    Replier::new(transport, SendOptions::default())
        .send_envelope(&to, &request)
        .await
        .context("Failed to send message")?;
    println!("✓ Sent {} from {}", request.id, info.address);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait);
    while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        print_reply(&msg);
    }

    manager.disconnect().await?;
    Ok(())
}

fn print_reply(msg: &InboundMessage) {
    let Payload::Text(raw) = &msg.payload else {
        println!("[{}] <binary>", msg.src);
        return;
    };

    match decode(raw).map(|e| e.body) {
        Some(Body::Receipt { target_id }) => println!("  ✓ delivered {}", target_id),
        Some(Body::Read { read_ids }) => println!("  ✓ read {}", read_ids.join(", ")),
        Some(Body::Text { content }) => println!("[{}] {}", msg.src, content),
        Some(Body::Contact(profile)) => println!("[{}] contact profile {:?}", msg.src, profile),
        Some(Body::Other { content_type, .. }) => println!("[{}] <{}>", msg.src, content_type),
        None => println!("[{}] {}", msg.src, raw),
    }
}

fn handle_keygen(identifier: Option<String>) -> Result<()> {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    let seed = hex::encode(seed);

    let identity = ClientIdentity::new(seed.clone()).with_identifier(identifier.unwrap_or_default());
    println!("Seed:    {}", seed);
    println!("Address: {}", identity.address());
    Ok(())
}

fn handle_address(seed: String, identifier: Option<String>) -> Result<()> {
    let identity = ClientIdentity::new(seed).with_identifier(identifier.unwrap_or_default());
    println!("{}", identity.address());
    Ok(())
}
