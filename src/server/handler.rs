//! Server side of one accepted connection
//!
//! Drives the lifecycle from key exchange to close. Everything before the
//! session is registered runs under one deadline; after that the handler
//! only reads, decrypts and relays until the peer goes away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broadcast::BroadcastEngine;
use super::registry::{ClientRegistry, ConnectionId, Session};
use crate::connection::{ConnectionState, Role, StateMachine};
use crate::crypto::{CredentialCheck, Keypair, MessageCodec, PeerPublicKey};
use crate::error::{ChatError, ChatResult};
use crate::handshake::{AuthGate, KeyExchange};
use crate::protocol::{
    join_notice, normalize_display_name, welcome_notice, ChatEnvelope, Payload,
};
use crate::send_path::SendPath;
use crate::transport::{BlockReader, BlockWriter};

/// State shared by every connection of one server
#[derive(Clone)]
pub struct ServerContext {
    /// Server keypair
    pub keypair: Arc<Keypair>,
    /// Password gate
    pub credentials: Arc<dyn CredentialCheck>,
    /// Registered sessions
    pub registry: Arc<ClientRegistry>,
    /// Fan-out over `registry`
    pub broadcast: BroadcastEngine,
    /// Deadline for reaching `Active`
    pub handshake_timeout: Duration,
}

/// Owns one connection until it closes
pub struct ConnectionHandler<R, W> {
    id: ConnectionId,
    remote_addr: SocketAddr,
    reader: BlockReader<R>,
    // Moved into the send path once the session registers
    writer: Option<BlockWriter<W>>,
    ctx: ServerContext,
    state: StateMachine,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap freshly accepted halves
    pub fn new(ctx: ServerContext, remote_addr: SocketAddr, reader: R, writer: W) -> Self {
        ConnectionHandler {
            id: ctx.registry.allocate_id(),
            remote_addr,
            reader: BlockReader::new(reader),
            writer: Some(BlockWriter::new(writer)),
            ctx,
            state: StateMachine::new(Role::Server),
        }
    }

    /// Handle this connection is registered under once it gets that far
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Follow this connection's lifecycle
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run the connection to completion
    ///
    /// `Ok` means the connection was closed from our side (shutdown or a
    /// failed send); a peer hanging up comes back as a disconnect error.
    pub async fn run(mut self) -> ChatResult<()> {
        info!("New connection {} from {}", self.id, self.remote_addr);

        let result = self.drive().await;
        self.state.close();

        match &result {
            Ok(()) => info!("Connection {} closed", self.id),
            Err(e) if e.is_disconnect() => info!("Connection {} ended: {}", self.id, e),
            Err(ChatError::AuthRejected(_)) => {
                warn!("Connection {} from {} failed authentication", self.id, self.remote_addr)
            }
            Err(e) => warn!("Connection {} failed: {}", self.id, e),
        }
        result
    }

    async fn drive(&mut self) -> ChatResult<()> {
        let limit = self.ctx.handshake_timeout;
        let (peer_key, display_name) = match tokio::time::timeout(limit, self.establish()).await {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => {
                self.abandon().await;
                return Err(e);
            }
            Err(_) => {
                self.abandon().await;
                return Err(ChatError::Timeout(limit.as_secs()));
            }
        };

        let (session, send_task) = self.register(peer_key, display_name)?;
        let result = self.relay(&session, send_task).await;

        if let Some(gone) = self.ctx.registry.remove(session.id) {
            self.ctx.broadcast.announce_departure(&gone);
        }
        session.outbound.close();
        result
    }

    /// Key exchange, password gate and display name
    async fn establish(&mut self) -> ChatResult<(PeerPublicKey, String)> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ChatError::Protocol("connection writer already taken".to_string()))?;
        let local = self.ctx.keypair.as_ref();

        let peer_key = KeyExchange::accept(&mut self.reader, writer, local).await?;
        info!("Connection {} completed key exchange, peer key {}", self.id, peer_key.fingerprint());

        self.state.advance(ConnectionState::Authenticating)?;
        AuthGate::verify(
            &mut self.reader,
            writer,
            local,
            &peer_key,
            self.ctx.credentials.as_ref(),
        )
        .await?;
        info!("Connection {} authenticated", self.id);

        self.state.advance(ConnectionState::Registering)?;
        let block = self.reader.read_block(local.block_size()).await?;
        let display_name = normalize_display_name(&MessageCodec::decode(&block, local)?);

        Ok((peer_key, display_name))
    }

    /// Join the registry and tell everyone
    fn register(
        &mut self,
        peer_key: PeerPublicKey,
        display_name: String,
    ) -> ChatResult<(Session, JoinHandle<ChatResult<()>>)> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ChatError::Protocol("connection writer already taken".to_string()))?;
        let (outbound, send_task) = SendPath::spawn(writer, peer_key.clone());

        let session = Session {
            id: self.id,
            remote_addr: self.remote_addr,
            peer_key,
            display_name,
            outbound,
        };
        let count = self.ctx.registry.add(session.clone());

        if let Err(e) = self.state.advance(ConnectionState::Active) {
            self.ctx.registry.remove(session.id);
            session.outbound.close();
            return Err(e);
        }
        info!(
            "{} joined as {} ({} online)",
            self.remote_addr, session.display_name, count
        );

        let broadcast = &self.ctx.broadcast;
        broadcast.publish_user_count();
        broadcast.broadcast_excluding(&join_notice(&session.display_name), session.id);
        // A failure here has already deregistered us; the receive loop
        // notices through the finished send task
        let _ = broadcast.send_to(&session, &welcome_notice(&session.display_name));

        Ok((session, send_task))
    }

    /// Receive loop: relay every chat line until either direction dies
    async fn relay(
        &mut self,
        session: &Session,
        mut send_task: JoinHandle<ChatResult<()>>,
    ) -> ChatResult<()> {
        let local = self.ctx.keypair.clone();
        let block_size = local.block_size();

        loop {
            tokio::select! {
                block = self.reader.read_block(block_size) => {
                    let text = MessageCodec::decode(&block?, &local)?;
                    match Payload::parse(&text) {
                        Payload::Control(control) => {
                            debug!("Dropping control payload {} from {}", control, session.id);
                        }
                        Payload::Chat(_) => {
                            let envelope = ChatEnvelope::new(session.display_name.as_str(), text);
                            self.ctx.broadcast.broadcast_to_all(&envelope);
                        }
                    }
                }
                finished = &mut send_task => {
                    return match finished {
                        Ok(result) => result,
                        Err(e) => Err(ChatError::SendFailure(e.to_string())),
                    };
                }
            }
        }
    }

    /// Close a connection that never registered
    async fn abandon(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}
