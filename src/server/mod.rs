//! Chat server
//!
//! Accepts TCP connections and gives each one its own [`ConnectionHandler`]
//! task. Handlers share the registry and broadcast engine; nothing else is
//! shared between connections.

pub mod broadcast;
pub mod handler;
pub mod registry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub use broadcast::BroadcastEngine;
pub use handler::{ConnectionHandler, ServerContext};
pub use registry::{ClientRegistry, ConnectionId, Session};

use crate::config::ServerConfig;
use crate::crypto::{CredentialCheck, Keypair, PeerPublicKey};
use crate::error::{ChatError, ChatResult};
use crate::transport::TransportError;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A chat server bound to one keypair and one password
pub struct ChatServer {
    config: ServerConfig,
    ctx: ServerContext,
}

impl ChatServer {
    /// Create a server; nothing is bound until [`ChatServer::bind`]
    pub fn new(config: ServerConfig, keypair: Arc<Keypair>, credentials: Arc<dyn CredentialCheck>) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let ctx = ServerContext {
            keypair,
            credentials,
            broadcast: BroadcastEngine::new(registry.clone()),
            registry,
            handshake_timeout: config.handshake_timeout(),
        };
        ChatServer { config, ctx }
    }

    /// Settings this server was created with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registered sessions
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.ctx.registry
    }

    /// Key clients will encrypt to
    pub fn public_key(&self) -> &PeerPublicKey {
        self.ctx.keypair.public_key()
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> ChatResult<TcpListener> {
        TcpListener::bind(&self.config.bind_addr).await.map_err(|e| {
            ChatError::Transport(TransportError::ConnectionFailed(format!(
                "binding {}: {}",
                self.config.bind_addr, e
            )))
        })
    }

    /// Handler for a connection accepted by some other means
    pub fn handler<R, W>(&self, remote_addr: SocketAddr, reader: R, writer: W) -> ConnectionHandler<R, W>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        ConnectionHandler::new(self.ctx.clone(), remote_addr, reader, writer)
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Accept errors are logged and never end the loop. On shutdown every
    /// registered session's send path is closed.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> ChatResult<()>
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            info!("Chat server listening on {}", addr);
        }
        info!("Server key fingerprint: {}", self.public_key().fingerprint());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let (read, write) = stream.into_split();
                        tokio::spawn(self.handler(addr, read, write).run());
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        let closed = self.close_all();
        info!("Closed {} session(s)", closed);
        Ok(())
    }

    /// Deregister everyone and close their send paths
    pub fn close_all(&self) -> usize {
        let sessions = self.ctx.registry.drain();
        for session in &sessions {
            session.outbound.close();
        }
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{test_keypair, Credential};

    fn server() -> ChatServer {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        ChatServer::new(
            config,
            Arc::new(test_keypair(0).clone()),
            Arc::new(Credential::from_password("pw")),
        )
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = server();
        let listener = server.bind().await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let serving = async {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
        };
        let _ = tx.send(());
        serving.await.unwrap();
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let server = server();
        let taken = server.bind().await.unwrap();

        let clash = ChatServer::new(
            ServerConfig {
                bind_addr: taken.local_addr().unwrap().to_string(),
                ..Default::default()
            },
            Arc::new(test_keypair(0).clone()),
            Arc::new(Credential::from_password("pw")),
        );
        assert!(matches!(
            clash.bind().await,
            Err(ChatError::Transport(TransportError::ConnectionFailed(_)))
        ));
    }

    #[test]
    fn test_public_key_is_server_key() {
        assert_eq!(server().public_key(), test_keypair(0).public_key());
    }
}
