//! End-to-end chat flows over loopback TCP

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use cipherchat::crypto::MessageCodec;
use cipherchat::handshake::KeyExchange;
use cipherchat::transport::{BlockReader, BlockWriter, TransportError};
use cipherchat::{
    ChatClient, ChatEnvelope, ChatError, ChatServer, ClientConfig, ClientEvent, Credential, Keypair,
    ServerConfig,
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const PASSWORD: &str = "correct horse battery staple";

/// RSA generation dominates test time, so every key is made once
fn keypair(index: usize) -> Arc<Keypair> {
    static KEYS: [OnceLock<Arc<Keypair>>; 4] = [OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new()];
    KEYS[index]
        .get_or_init(|| Arc::new(Keypair::generate(1024).unwrap()))
        .clone()
}

struct TestServer {
    server: Arc<ChatServer>,
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            key_bits: 1024,
            handshake_timeout_secs: 10,
        };
        let server = Arc::new(ChatServer::new(
            config,
            keypair(0),
            Arc::new(Credential::from_password(PASSWORD)),
        ));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let serving = server.clone();
        tokio::spawn(async move {
            serving
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        TestServer {
            server,
            addr,
            stop: Some(stop),
        }
    }

    async fn join(&self, key_index: usize, name: &str, password: &str) -> Result<ChatClient, ChatError> {
        let config = ClientConfig {
            server_addr: self.addr.to_string(),
            username: name.to_string(),
            key_bits: 1024,
        };
        ChatClient::connect(&config, keypair(key_index), password).await
    }

    fn registered_names(&self) -> Vec<String> {
        self.server
            .registry()
            .snapshot()
            .into_iter()
            .map(|s| s.display_name)
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn next(client: &mut ChatClient) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(10), client.next_event())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

fn server_says(body: &str) -> ClientEvent {
    ClientEvent::Message(ChatEnvelope::server(body))
}

/// Raw connection that stops after sending its name
async fn raw_join(
    addr: SocketAddr,
    key_index: usize,
    password: &str,
    name: &str,
) -> (BlockReader<tokio::net::tcp::OwnedReadHalf>, BlockWriter<tokio::net::tcp::OwnedWriteHalf>, String) {
    let local = keypair(key_index);
    let (read, write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut reader = BlockReader::new(read);
    let mut writer = BlockWriter::new(write);

    let server_key = KeyExchange::connect(&mut reader, &mut writer, &local).await.unwrap();
    writer
        .write_block(&MessageCodec::encode(password, &server_key).unwrap())
        .await
        .unwrap();
    let verdict = reader.read_block(local.block_size()).await.unwrap();
    let verdict = MessageCodec::decode(&verdict, &local).unwrap();

    if verdict.starts_with("AUTHSUCCESS:") {
        writer
            .write_block(&MessageCodec::encode(name, &server_key).unwrap())
            .await
            .unwrap();
    }
    (reader, writer, verdict)
}

#[tokio::test]
async fn test_two_clients_chat() {
    let server = TestServer::start().await;

    let mut alice = server.join(1, "A", PASSWORD).await.unwrap();
    assert_eq!(next(&mut alice).await, ClientEvent::UserCount(1));
    assert_eq!(next(&mut alice).await, server_says("Welcome to the chat, A!"));

    let mut bob = server.join(2, "B", PASSWORD).await.unwrap();
    assert_eq!(next(&mut bob).await, ClientEvent::UserCount(2));
    assert_eq!(next(&mut bob).await, server_says("Welcome to the chat, B!"));
    assert_eq!(next(&mut alice).await, ClientEvent::UserCount(2));
    assert_eq!(next(&mut alice).await, server_says("B has joined the chat"));

    alice.send("hi").unwrap();
    let expected = ClientEvent::Message(ChatEnvelope::new("A", "hi"));
    assert_eq!(next(&mut alice).await, expected);
    assert_eq!(next(&mut bob).await, expected);
    assert_eq!(bob.user_count(), 2);
}

#[tokio::test]
async fn test_wrong_password_gets_verdict_then_close() {
    let server = TestServer::start().await;

    let (mut reader, _writer, verdict) = raw_join(server.addr, 1, "wrong", "mallory").await;
    assert_eq!(verdict, "AUTHFAILED:Invalid password");

    let after = reader.read_block(keypair(1).block_size()).await;
    assert!(matches!(after, Err(TransportError::Disconnected)));
    assert_eq!(server.server.registry().len(), 0);
}

#[tokio::test]
async fn test_auth_gate_decides_registration() {
    let server = TestServer::start().await;

    let rejected = server.join(1, "mallory", "letmein").await;
    assert!(matches!(rejected, Err(ChatError::AuthRejected(_))));
    assert!(server.registered_names().is_empty());

    let mut accepted = server.join(2, "trent", PASSWORD).await.unwrap();
    assert_eq!(accepted.state(), cipherchat::ConnectionState::Active);
    // The welcome is sent after registration, so it proves we are in the snapshot
    next(&mut accepted).await;
    next(&mut accepted).await;
    assert_eq!(server.registered_names(), vec!["trent"]);
}

#[tokio::test]
async fn test_abrupt_disconnect_announced() {
    let server = TestServer::start().await;

    let mut alice = server.join(1, "A", PASSWORD).await.unwrap();
    next(&mut alice).await;
    next(&mut alice).await;

    let mut carol = server.join(3, "C", PASSWORD).await.unwrap();
    next(&mut alice).await;
    next(&mut alice).await;
    next(&mut carol).await;
    next(&mut carol).await;

    let (reader, writer, verdict) = raw_join(server.addr, 2, PASSWORD, "B").await;
    assert!(verdict.starts_with("AUTHSUCCESS:"));
    assert_eq!(next(&mut alice).await, ClientEvent::UserCount(3));
    assert_eq!(next(&mut alice).await, server_says("B has joined the chat"));
    assert_eq!(next(&mut carol).await, ClientEvent::UserCount(3));
    assert_eq!(next(&mut carol).await, server_says("B has joined the chat"));

    // Vanish without a goodbye
    drop(reader);
    drop(writer);

    for client in [&mut alice, &mut carol] {
        assert_eq!(next(client).await, server_says("B has left the chat"));
        assert_eq!(next(client).await, ClientEvent::UserCount(2));
    }
    assert_eq!(server.registered_names(), vec!["A", "C"]);
}

#[tokio::test]
async fn test_long_line_truncated_for_each_recipient() {
    let server = TestServer::start().await;

    let mut alice = server.join(1, "A", PASSWORD).await.unwrap();
    next(&mut alice).await;
    next(&mut alice).await;

    alice.send(&"x".repeat(500)).unwrap();
    match next(&mut alice).await {
        ClientEvent::Message(envelope) => {
            assert_eq!(envelope.sender_label(), "A");
            assert!(envelope.body().ends_with("... (message truncated)"));
            // 1024-bit key: 128-byte block, 11 bytes of padding
            assert_eq!(envelope.to_wire().len(), 117);
        }
        other => panic!("expected a chat line, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let mut server = TestServer::start().await;

    let mut alice = server.join(1, "A", PASSWORD).await.unwrap();
    next(&mut alice).await;
    next(&mut alice).await;

    if let Some(stop) = server.stop.take() {
        stop.send(()).unwrap();
    }
    assert!(matches!(next(&mut alice).await, ClientEvent::Disconnected(_)));
}
