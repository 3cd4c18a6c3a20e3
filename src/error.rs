//! Protocol-level errors

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Errors that end (or refuse) a chat connection
#[derive(Error, Debug)]
pub enum ChatError {
    /// Public key exchange failed; no session was created
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Credential rejected; one response frame was sent before closing
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// A block could not be decrypted or decoded
    #[error("Decode failed: {0}")]
    Decode(#[from] CryptoError),

    /// Queueing or writing to one peer failed
    #[error("Send failed: {0}")]
    SendFailure(String),

    /// Socket or framing error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection did not reach the active state in time
    #[error("Timed out after {0} seconds before the session became active")]
    Timeout(u64),

    /// A lifecycle transition the state machine does not allow
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State we were in
        from: ConnectionState,
        /// State we were asked to enter
        to: ConnectionState,
    },

    /// The peer broke protocol in a way that is not a crypto failure
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// True for errors that amount to the peer going away
    ///
    /// Decode failures count: a truncated or garbled block is treated the
    /// same as a close.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(TransportError::Disconnected)
                | ChatError::Transport(TransportError::Truncated { .. })
                | ChatError::Transport(TransportError::ReceiveFailed(_))
                | ChatError::Decode(_)
        )
    }
}

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(ChatError::from(TransportError::Disconnected).is_disconnect());
        assert!(ChatError::from(CryptoError::DecryptionFailed).is_disconnect());
        assert!(ChatError::from(TransportError::Truncated {
            received: 1,
            expected: 2
        })
        .is_disconnect());

        assert!(!ChatError::AuthRejected("nope".to_string()).is_disconnect());
        assert!(!ChatError::Handshake("bad key".to_string()).is_disconnect());
        assert!(!ChatError::Timeout(30).is_disconnect());
    }
}
