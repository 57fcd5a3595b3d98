// End-to-end tests for the terminal over the in-process network

use peer_terminal::terminal::envelope::{Avatar, ProfileContent};
use peer_terminal::terminal::memory::MemoryTransport;
use peer_terminal::terminal::{
    builtin_commands, decode, encode, Body, CommandSpec, CommandTable, ConnectionState,
    ContactProfile, Envelope, InboundMessage, MemoryNetwork, Payload, ProfileDescriptor,
    Replier, SendOptions, Terminal, TerminalConfig, TerminalError, Transport, TransportError,
    TransportEvent,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const PEER: &str = "addrA";

struct Harness {
    _dir: TempDir,
    network: MemoryNetwork,
    terminal: Terminal,
    peer: Arc<MemoryTransport>,
    peer_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Harness {
    async fn start(allowed: &[&str], commands: CommandTable) -> Self {
        Self::start_with(allowed, commands, |terminal| terminal, |_| {}).await
    }

    async fn start_with(
        allowed: &[&str],
        commands: CommandTable,
        customize: impl FnOnce(Terminal) -> Terminal,
        configure: impl FnOnce(&mut TerminalConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("authorized"), allowed.join("\n")).unwrap();

        let mut config = TerminalConfig::new("terminal-seed");
        config.base_dir = dir.path().to_path_buf();
        configure(&mut config);

        let network = MemoryNetwork::new();
        let terminal = Terminal::new(config, Arc::new(network.clone()), commands).unwrap();
        let terminal = customize(terminal);
        terminal.connect().await.unwrap();

        let (peer, peer_rx) = network.join(PEER).await;

        Self {
            _dir: dir,
            network,
            terminal,
            peer,
            peer_rx,
        }
    }

    async fn send(&self, envelope: &Envelope) {
        self.send_raw(&encode(envelope)).await;
    }

    async fn send_raw(&self, raw: &str) {
        self.peer
            .send(&self.terminal.address(), raw, &SendOptions::default())
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Envelope {
        let event = tokio::time::timeout(Duration::from_secs(5), self.peer_rx.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("peer channel closed");

        match event {
            TransportEvent::Message(InboundMessage {
                payload: Payload::Text(raw),
                ..
            }) => decode(&raw).expect("terminal sent an invalid envelope"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    async fn next_text(&mut self) -> String {
        match self.next().await.body {
            Body::Text { content } => content,
            other => panic!("expected text, got {:?}", other),
        }
    }

    /// Expect a receipt then a read for `id`
    async fn expect_acks(&mut self, id: &str) {
        assert_eq!(
            self.next().await.body,
            Body::Receipt {
                target_id: id.to_string()
            }
        );
        assert_eq!(
            self.next().await.body,
            Body::Read {
                read_ids: vec![id.to_string()]
            }
        );
    }

    async fn expect_silence(&mut self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(self.peer_rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn test_echo_acknowledged_then_answered() {
    let mut h = Harness::start(&[PEER], builtin_commands()).await;

    let request = Envelope::text("/echo hello");
    h.send(&request).await;

    h.expect_acks(&request.id).await;
    assert_eq!(h.next_text().await, "hello");
    h.expect_silence().await;
}

#[tokio::test]
async fn test_malformed_and_control_get_no_reply() {
    let mut h = Harness::start(&[PEER], builtin_commands()).await;

    h.send_raw("not json at all").await;
    h.send_raw(r#"{"contentType":"text","content":"/ping"}"#).await;
    h.send_raw(r#"{"id":"1","content":"/ping"}"#).await;
    h.send(&Envelope::receipt("some-id")).await;
    h.send(&Envelope::read(vec!["some-id".to_string()])).await;

    h.expect_silence().await;
}

#[tokio::test]
async fn test_contact_full_profile() {
    let avatar_bytes = [0x89u8, b'P', b'N', b'G', 0, 255];
    let mut h = Harness::start_with(
        &[],
        builtin_commands(),
        |terminal| terminal,
        |config| {
            std::fs::write(config.base_dir.join("avatar.png"), avatar_bytes).unwrap();
            config.profile = ProfileDescriptor {
                name: "Terminal".to_string(),
                avatar: Some(PathBuf::from("avatar.png")),
                avatar_ext: "png".to_string(),
                version: "7".to_string(),
            };
        },
    )
    .await;

    let request = Envelope::contact(ContactProfile {
        request_type: Some("full".to_string()),
        ..Default::default()
    });
    h.send(&request).await;

    let reply = h.next().await;
    let Body::Contact(profile) = reply.body else {
        panic!("expected contact reply, got {:?}", reply.body);
    };
    assert_eq!(profile.response_type.as_deref(), Some("full"));
    assert_eq!(profile.version.as_deref(), Some("7"));
    assert_eq!(
        profile.content,
        Some(ProfileContent {
            name: "Terminal".to_string(),
            avatar: Some(Avatar {
                encoding: "base64".to_string(),
                data: "iVBORwD/".to_string(),
                ext: "png".to_string(),
            }),
        })
    );

    // Profile exchange is never acknowledged
    h.expect_silence().await;
}

#[tokio::test]
async fn test_contact_header_request() {
    let mut h = Harness::start(&[], builtin_commands()).await;

    h.send(&Envelope::contact(ContactProfile {
        request_type: Some("header".to_string()),
        ..Default::default()
    }))
    .await;

    let Body::Contact(profile) = h.next().await.body else {
        panic!("expected contact reply");
    };
    assert_eq!(profile.response_type.as_deref(), Some("header"));
    assert!(profile.content.is_none());
}

#[tokio::test]
async fn test_handler_failure_is_reported() {
    let table = builtin_commands().register(CommandSpec::new(
        "fail",
        "Always fails",
        |_, _, _| async { Err::<(), _>(anyhow::anyhow!("bad arg")) },
    ));
    let mut h = Harness::start(&[PEER], table).await;

    let request = Envelope::text("/fail");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    let reply = h.next_text().await;
    assert!(reply.contains("fail"), "{}", reply);
    assert!(reply.contains("bad arg"), "{}", reply);

    // The terminal keeps serving
    let request = Envelope::text("/ping");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    assert_eq!(h.next_text().await, "pong");
}

#[tokio::test]
async fn test_unlisted_sender_denied() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let table = CommandTable::new().register(CommandSpec::new(
        "ping",
        "Counted ping",
        move |_, src, replier: Replier| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                replier.send_result(&src, "pong").await?;
                anyhow::Ok(())
            }
        },
    ));
    let mut h = Harness::start(&["someone-else"], table).await;

    let request = Envelope::text("/ping");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    assert_eq!(h.next_text().await, "> ⚠️ **Error**: Permission denied");
    h.expect_silence().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_allow_list_denies_everyone() {
    let mut h = Harness::start(&[], builtin_commands()).await;
    assert!(h.terminal.router().gate().addresses().is_empty());

    let request = Envelope::text("/ping");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    assert_eq!(h.next_text().await, "> ⚠️ **Error**: Permission denied");
}

#[tokio::test]
async fn test_denial_hook_replaces_standard_reply() {
    let mut h = Harness::start_with(
        &[],
        builtin_commands(),
        |terminal| {
            terminal.on_unauthorized(|src: String, replier: Replier| async move {
                let _ = replier
                    .send_result(&src, format!("{} is not on the list", src))
                    .await;
            })
        },
        |_| {},
    )
    .await;

    let request = Envelope::text("/ping");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    assert_eq!(h.next_text().await, "addrA is not on the list");
    h.expect_silence().await;
}

#[tokio::test]
async fn test_help_and_unknown_commands() {
    let mut h = Harness::start(&[PEER], builtin_commands()).await;

    let request = Envelope::text("/help");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    let help = h.next_text().await;
    for name in ["echo", "ping", "whoami", "time"] {
        assert!(help.contains(name), "{} missing from {}", name, help);
    }

    let request = Envelope::text("/launch rockets");
    h.send(&request).await;
    h.expect_acks(&request.id).await;
    let error = h.next_text().await;
    assert!(error.starts_with("> ⚠️ **Error**"), "{}", error);
    assert!(error.contains("launch"), "{}", error);
}

#[tokio::test]
async fn test_chat_group_and_media_only_acknowledged() {
    let mut h = Harness::start(&[PEER], builtin_commands()).await;

    let chat = Envelope::text("just chatting");
    h.send(&chat).await;
    h.expect_acks(&chat.id).await;

    let mut group = Envelope::text("/ping");
    group.group_id = Some("room-1".to_string());
    h.send(&group).await;
    h.expect_acks(&group.id).await;

    let media = Envelope::new(Body::Other {
        content_type: "image".to_string(),
        content: Some(serde_json::json!("aGVsbG8=")),
    });
    h.send(&media).await;
    h.expect_acks(&media.id).await;

    h.expect_silence().await;
}

#[tokio::test]
async fn test_disconnect_takes_terminal_offline() {
    let h = Harness::start(&[PEER], builtin_commands()).await;
    assert_eq!(h.terminal.state().await, ConnectionState::Connected);

    h.terminal.disconnect().await.unwrap();
    assert_eq!(h.terminal.state().await, ConnectionState::Disconnected);
    assert!(!h.network.is_online(&h.terminal.address()).await);

    let result = h
        .peer
        .send(&h.terminal.address(), "{}", &SendOptions::default())
        .await;
    assert!(matches!(result, Err(TransportError::UnknownPeer(_))));
    assert!(matches!(
        h.terminal.disconnect().await,
        Err(TerminalError::NotConnected)
    ));
}
