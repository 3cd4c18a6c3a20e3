//! # cipherchat
//!
//! Multi-user chat relay with per-message RSA encryption.
//!
//! ## Features
//!
//! - **Per-connection key exchange** of PKCS#1 PEM public keys
//! - **Password-gated entry** checked against a salted BLAKE3 digest
//! - **Fixed-size framing**: every message is exactly one RSA block
//! - **Fan-out relay** that encrypts each copy to its recipient's key
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cipherchat::{ChatServer, Credential, Keypair, ServerConfig};
//!
//! # async fn run() -> cipherchat::ChatResult<()> {
//! let config = ServerConfig::default();
//! let keypair = Arc::new(Keypair::generate(config.key_bits)?);
//! let credential = Arc::new(Credential::from_password("hunter2"));
//!
//! let server = ChatServer::new(config, keypair, credential);
//! let listener = server.bind().await?;
//! server.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │   cipherchat (client)  |  cipherchat-server │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              PROTOCOL LAYER                 │
//! │ Handshake | Auth | Registry | Broadcast     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │   RSA PKCS#1 v1.5  |  BLAKE3 credential     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │     PEM lines  |  fixed-size blocks (TCP)   │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod send_path;
pub mod server;
pub mod transport;

// Re-export main types at crate root
pub use client::{ChatClient, ClientEvent};
pub use config::{ClientConfig, ServerConfig};
pub use connection::{ConnectionState, Role};
pub use crypto::{Credential, CredentialCheck, CryptoError, CryptoResult, Keypair, PeerPublicKey};
pub use error::{ChatError, ChatResult};
pub use protocol::{ChatEnvelope, ControlMessage, Payload};
pub use server::{ChatServer, ClientRegistry, ConnectionId, Session};
