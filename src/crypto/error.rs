//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key generation failed (e.g. an unsupported modulus size)
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// The public key encoding could not be parsed
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The private key encoding could not be parsed
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// A key could not be serialized
    #[error("Key encoding failed: {0}")]
    KeyEncodingFailed(String),

    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed - padding check or key mismatch
    #[error("Decryption failed")]
    DecryptionFailed,

    /// A ciphertext block does not match the local modulus size
    #[error("Invalid block length: expected {expected}, got {actual}")]
    InvalidBlockLength {
        /// Expected block length in bytes
        expected: usize,
        /// Actual block length in bytes
        actual: usize,
    },

    /// Decrypted payload is not valid UTF-8
    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    /// A stored credential could not be parsed
    #[error("Invalid credential encoding: {0}")]
    InvalidCredential(String),

    /// Reading or writing a key file failed
    #[error("Key file error: {0}")]
    KeyFile(String),
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
