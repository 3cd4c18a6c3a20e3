//! Cryptographic primitives for cipherchat
//!
//! This module provides the building blocks the protocol is made of:
//! - `keys`: RSA keypairs and PEM encoded peer public keys
//! - `codec`: single-block PKCS#1 v1.5 message encryption with truncation
//! - `credential`: salted BLAKE3 password digests and the check trait
//! - `keystore`: keypair persistence on disk

pub mod codec;
pub mod credential;
pub mod error;
pub mod keys;
pub mod keystore;

// Re-export commonly used types
pub use codec::{MessageCodec, PKCS1_V15_OVERHEAD, TRUNCATION_MARKER};
pub use credential::{Credential, CredentialCheck};
pub use error::{CryptoError, CryptoResult};
pub use keys::{Keypair, PeerPublicKey, DEFAULT_CLIENT_KEY_BITS, DEFAULT_SERVER_KEY_BITS};

/// Small keys shared by every unit test in the crate
///
/// RSA generation dominates test time, so each key is made once per binary.
#[cfg(test)]
pub(crate) fn test_keypair(index: usize) -> &'static Keypair {
    use std::sync::OnceLock;

    static KEYS: [OnceLock<Keypair>; 3] = [OnceLock::new(), OnceLock::new(), OnceLock::new()];
    KEYS[index].get_or_init(|| Keypair::generate(1024).unwrap())
}
