//! Byte-level transport
//!
//! This module moves two kinds of units over any async byte stream:
//! - PEM documents, exchanged once during the handshake, read line by line
//!   up to their `-----END` line
//! - fixed-size ciphertext blocks, exchanged for the rest of the connection,
//!   read with exactly one modulus worth of bytes per message
//!
//! # Design
//!
//! The transport does not know about keys or plaintext. Encryption is handled
//! by the codec; sizing is passed in by the caller.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest PEM document accepted during the handshake
pub const MAX_PEM_LEN: usize = 16 * 1024;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the connection between messages
    #[error("Connection closed")]
    Disconnected,

    /// Peer closed the connection part-way through a block
    #[error("Connection closed mid-block: got {received} of {expected} bytes")]
    Truncated {
        /// Bytes received before the close
        received: usize,
        /// Block size that was expected
        expected: usize,
    },

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Reading half of a connection
///
/// Wraps the stream in a buffer that lives as long as the connection, so
/// bytes read ahead while scanning the PEM are not lost to the first block.
pub struct BlockReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> BlockReader<R> {
    /// Wrap the reading half of a stream
    pub fn new(reader: R) -> Self {
        BlockReader {
            inner: BufReader::new(reader),
        }
    }

    /// Read exactly one block of `size` bytes
    ///
    /// A close before the first byte is [`TransportError::Disconnected`]; a
    /// close after it is [`TransportError::Truncated`].
    pub async fn read_block(&mut self, size: usize) -> TransportResult<Vec<u8>> {
        let mut block = vec![0u8; size];
        let mut filled = 0;

        while filled < size {
            let n = self
                .inner
                .read(&mut block[filled..])
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

            if n == 0 {
                return Err(if filled == 0 {
                    TransportError::Disconnected
                } else {
                    TransportError::Truncated {
                        received: filled,
                        expected: size,
                    }
                });
            }
            filled += n;
        }

        Ok(block)
    }

    /// Read one PEM document, through its `-----END ...-----` line
    pub async fn read_pem(&mut self) -> TransportResult<String> {
        let mut pem = String::new();

        loop {
            let before = pem.len();
            let n = (&mut self.inner)
                .take((MAX_PEM_LEN + 1 - before) as u64)
                .read_line(&mut pem)
                .await
                .map_err(|e| TransportError::InvalidData(e.to_string()))?;

            if n == 0 {
                return Err(if pem.is_empty() {
                    TransportError::Disconnected
                } else {
                    TransportError::InvalidData("connection closed inside PEM document".to_string())
                });
            }
            if pem.len() > MAX_PEM_LEN {
                return Err(TransportError::InvalidData(format!(
                    "PEM document exceeds {} bytes",
                    MAX_PEM_LEN
                )));
            }

            let line = pem[before..].trim();
            if line.starts_with("-----END ") && line.ends_with("-----") {
                return Ok(pem);
            }
        }
    }
}

/// Writing half of a connection
pub struct BlockWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> BlockWriter<W> {
    /// Wrap the writing half of a stream
    pub fn new(writer: W) -> Self {
        BlockWriter { inner: writer }
    }

    /// Write one block and flush it
    pub async fn write_block(&mut self, block: &[u8]) -> TransportResult<()> {
        self.inner
            .write_all(block)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Write a PEM document, terminating it with a newline if needed
    pub async fn write_pem(&mut self, pem: &str) -> TransportResult<()> {
        if pem.ends_with('\n') {
            self.write_block(pem.as_bytes()).await
        } else {
            self.write_block(format!("{}\n", pem).as_bytes()).await
        }
    }

    /// Close our direction of the stream
    pub async fn shutdown(&mut self) -> TransportResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// In-memory connections for testing
///
/// Backed by `tokio::io::duplex`, so framing behaves exactly as on a socket.
pub mod memory {
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    use super::{BlockReader, BlockWriter};

    /// One end of an in-memory connection, already split into halves
    pub type MemoryEnd = (BlockReader<ReadHalf<DuplexStream>>, BlockWriter<WriteHalf<DuplexStream>>);

    /// Create a pair of connected in-memory endpoints
    pub fn create_pair() -> (MemoryEnd, MemoryEnd) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (split(a), split(b))
    }

    /// Split a duplex stream into block halves
    pub fn split(stream: DuplexStream) -> MemoryEnd {
        let (read, write) = tokio::io::split(stream);
        (BlockReader::new(read), BlockWriter::new(write))
    }
}
