//! Chat client
//!
//! [`ChatClient`] runs the connecting side of the protocol and turns what the
//! server sends into [`ClientEvent`]s. It has no opinion on presentation; the
//! `cipherchat` binary is one line-oriented consumer of the events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, Role, StateMachine};
use crate::crypto::{Keypair, MessageCodec, PeerPublicKey};
use crate::error::{ChatError, ChatResult};
use crate::handshake::{AuthGate, KeyExchange};
use crate::protocol::{ChatEnvelope, ControlMessage, Payload};
use crate::send_path::SendPath;
use crate::transport::{BlockReader, BlockWriter, TransportError};

/// Something the presentation layer should know about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A chat line, including server notices (sender label `SERVER`)
    Message(ChatEnvelope),
    /// A line without a sender label
    System(String),
    /// The server announced a new online count
    UserCount(usize),
    /// The connection is gone; no further events follow
    Disconnected(String),
}

/// A registered connection to a chat server
pub struct ChatClient {
    server_key: PeerPublicKey,
    outbound: SendPath,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    user_count: Arc<AtomicUsize>,
    state: watch::Receiver<ConnectionState>,
    _receiver: JoinHandle<()>,
}

impl ChatClient {
    /// Connect over TCP, authenticate and register as `config.username`
    pub async fn connect(config: &ClientConfig, keypair: Arc<Keypair>, password: &str) -> ChatResult<Self> {
        let stream = TcpStream::connect(&config.server_addr).await.map_err(|e| {
            ChatError::Transport(TransportError::ConnectionFailed(format!(
                "{}: {}",
                config.server_addr, e
            )))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        info!("Connected to {}", config.server_addr);

        let (read, write) = stream.into_split();
        Self::establish(read, write, keypair, password, &config.username).await
    }

    /// Run the client role over an already open stream
    ///
    /// Returns once the session is active and the receive loop is running.
    pub async fn establish<R, W>(
        reader: R,
        writer: W,
        keypair: Arc<Keypair>,
        password: &str,
        username: &str,
    ) -> ChatResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BlockReader::new(reader);
        let mut writer = BlockWriter::new(writer);
        let machine = StateMachine::new(Role::Client);

        let server_key = KeyExchange::connect(&mut reader, &mut writer, &keypair).await?;
        info!("Server key fingerprint: {}", server_key.fingerprint());

        machine.advance(ConnectionState::Registering)?;
        AuthGate::present(&mut reader, &mut writer, &keypair, &server_key, password).await?;
        writer
            .write_block(&MessageCodec::encode(username, &server_key)?)
            .await?;

        let (outbound, send_task) = SendPath::spawn(writer, server_key.clone());
        machine.advance(ConnectionState::Active)?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let user_count = Arc::new(AtomicUsize::new(0));
        let state = machine.subscribe();
        let receiver = tokio::spawn(receive_loop(
            reader,
            keypair,
            machine,
            send_task,
            events_tx,
            user_count.clone(),
        ));

        Ok(ChatClient {
            server_key,
            outbound,
            events,
            user_count,
            state,
            _receiver: receiver,
        })
    }

    /// Queue a chat line
    ///
    /// The line is not echoed locally; it shows up as a
    /// [`ClientEvent::Message`] once the server relays it back.
    pub fn send(&self, line: &str) -> ChatResult<()> {
        self.outbound.enqueue(line)
    }

    /// Wait for the next event; `None` once the receive loop has finished
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Last online count the server announced
    pub fn user_count(&self) -> usize {
        self.user_count.load(Ordering::Relaxed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Key our messages are encrypted to
    pub fn server_key(&self) -> &PeerPublicKey {
        &self.server_key
    }

    /// Flush anything queued, then close our side
    pub fn disconnect(&self) {
        self.outbound.close();
    }
}

async fn receive_loop<R>(
    mut reader: BlockReader<R>,
    keypair: Arc<Keypair>,
    machine: StateMachine,
    mut send_task: JoinHandle<ChatResult<()>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    user_count: Arc<AtomicUsize>,
) where
    R: AsyncRead + Unpin,
{
    let block_size = keypair.block_size();

    let reason = loop {
        tokio::select! {
            block = reader.read_block(block_size) => {
                let decoded = block
                    .map_err(ChatError::from)
                    .and_then(|b| MessageCodec::decode(&b, &keypair).map_err(ChatError::from));
                let text = match decoded {
                    Ok(text) => text,
                    Err(e) => break e.to_string(),
                };
                if let Some(event) = classify(&text, &user_count) {
                    let _ = events.send(event);
                }
            }
            finished = &mut send_task => {
                break match finished {
                    Ok(Ok(())) => "disconnected".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
            }
        }
    };

    machine.close();
    info!("Connection closed: {}", reason);
    let _ = events.send(ClientEvent::Disconnected(reason));
}

fn classify(text: &str, user_count: &AtomicUsize) -> Option<ClientEvent> {
    match Payload::parse(text) {
        Payload::Control(ControlMessage::UserCount(n)) => {
            user_count.store(n, Ordering::Relaxed);
            Some(ClientEvent::UserCount(n))
        }
        Payload::Control(other) => {
            debug!("Ignoring unexpected control message {}", other);
            None
        }
        Payload::Chat(envelope) if envelope.is_system() => {
            Some(ClientEvent::System(envelope.body().to_string()))
        }
        Payload::Chat(envelope) => Some(ClientEvent::Message(envelope)),
    }
}
