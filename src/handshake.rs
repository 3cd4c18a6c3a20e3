//! Key exchange and the password gate
//!
//! Both run on the raw block halves before a connection gets its send path,
//! so every write here is made by the one task that owns the connection.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{CredentialCheck, Keypair, MessageCodec, PeerPublicKey};
use crate::error::{ChatError, ChatResult};
use crate::protocol::ControlMessage;
use crate::transport::{BlockReader, BlockWriter, TransportError};

/// Smallest peer modulus we will encrypt to
pub const MIN_PEER_KEY_BITS: usize = 512;

/// Info string sent with a successful authentication
pub const AUTH_SUCCESS_INFO: &str = "Authentication successful";

/// Reason string sent with a failed authentication
pub const AUTH_FAILED_REASON: &str = "Invalid password";

/// Public key exchange
///
/// The accepting side speaks first and the connecting side listens first, so
/// the two can never both be waiting to read.
pub struct KeyExchange;

impl KeyExchange {
    /// Accepting side: send our key, then read the peer's
    pub async fn accept<R, W>(
        reader: &mut BlockReader<R>,
        writer: &mut BlockWriter<W>,
        local: &Keypair,
    ) -> ChatResult<PeerPublicKey>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        Self::send_key(writer, local).await?;
        Self::receive_key(reader).await
    }

    /// Connecting side: read the peer's key, then send ours
    pub async fn connect<R, W>(
        reader: &mut BlockReader<R>,
        writer: &mut BlockWriter<W>,
        local: &Keypair,
    ) -> ChatResult<PeerPublicKey>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let peer = Self::receive_key(reader).await?;
        Self::send_key(writer, local).await?;
        Ok(peer)
    }

    async fn send_key<W: AsyncWrite + Unpin>(
        writer: &mut BlockWriter<W>,
        local: &Keypair,
    ) -> ChatResult<()> {
        let pem = local
            .public_key()
            .to_pem()
            .map_err(|e| ChatError::Handshake(e.to_string()))?;
        writer
            .write_pem(&pem)
            .await
            .map_err(|e| ChatError::Handshake(format!("sending public key: {}", e)))
    }

    async fn receive_key<R: AsyncRead + Unpin>(
        reader: &mut BlockReader<R>,
    ) -> ChatResult<PeerPublicKey> {
        let pem = reader.read_pem().await.map_err(|e| match e {
            TransportError::Disconnected => {
                ChatError::Handshake("peer disconnected before sending its key".to_string())
            }
            other => ChatError::Handshake(format!("reading peer key: {}", other)),
        })?;

        let peer = PeerPublicKey::from_pem(&pem).map_err(|e| ChatError::Handshake(e.to_string()))?;
        if peer.block_size() * 8 < MIN_PEER_KEY_BITS {
            return Err(ChatError::Handshake(format!(
                "peer key of {} bits is below the {}-bit minimum",
                peer.block_size() * 8,
                MIN_PEER_KEY_BITS
            )));
        }

        debug!("Received peer key {:?}", peer);
        Ok(peer)
    }
}

/// Shared-password gate in front of registration
pub struct AuthGate;

impl AuthGate {
    /// Server side: read one credential block and answer it
    ///
    /// Either way exactly one response block is written. On rejection the
    /// caller is expected to close without registering anything.
    pub async fn verify<R, W>(
        reader: &mut BlockReader<R>,
        writer: &mut BlockWriter<W>,
        local: &Keypair,
        peer: &PeerPublicKey,
        credentials: &dyn CredentialCheck,
    ) -> ChatResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let block = reader.read_block(local.block_size()).await?;
        let candidate = Zeroizing::new(MessageCodec::decode(&block, local)?);

        if credentials.check(&candidate) {
            let response = ControlMessage::AuthSuccess(AUTH_SUCCESS_INFO.to_string());
            writer
                .write_block(&MessageCodec::encode(&response.to_wire(), peer)?)
                .await?;
            Ok(())
        } else {
            let response = ControlMessage::AuthFailed(AUTH_FAILED_REASON.to_string());
            writer
                .write_block(&MessageCodec::encode(&response.to_wire(), peer)?)
                .await?;
            Err(ChatError::AuthRejected(AUTH_FAILED_REASON.to_string()))
        }
    }

    /// Client side: send the password and wait for the verdict
    ///
    /// Returns the server's info string on success.
    pub async fn present<R, W>(
        reader: &mut BlockReader<R>,
        writer: &mut BlockWriter<W>,
        local: &Keypair,
        server: &PeerPublicKey,
        password: &str,
    ) -> ChatResult<String>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer
            .write_block(&MessageCodec::encode(password, server)?)
            .await?;

        let block = reader.read_block(local.block_size()).await?;
        let response = MessageCodec::decode(&block, local)?;

        match ControlMessage::parse(&response) {
            Some(ControlMessage::AuthSuccess(info)) => {
                info!("Server accepted credential: {}", info);
                Ok(info)
            }
            Some(ControlMessage::AuthFailed(reason)) => {
                warn!("Server rejected credential: {}", reason);
                Err(ChatError::AuthRejected(reason))
            }
            _ => Err(ChatError::Protocol(format!(
                "expected an authentication response, got {:?}",
                response
            ))),
        }
    }
}
