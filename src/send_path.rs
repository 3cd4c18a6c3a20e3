//! Outbound path of one connection
//!
//! Producers (the connection's own receive loop, every broadcast, the local
//! user on the client side) push plaintext into an unbounded queue. A single
//! task owns the write half, so blocks can never interleave on the wire. The
//! task sleeps on the queue and wakes exactly when something is pushed.

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::crypto::{MessageCodec, PeerPublicKey};
use crate::error::{ChatError, ChatResult};
use crate::transport::BlockWriter;

enum Outbound {
    Text(String),
    Close,
}

/// Handle for queueing plaintext to one peer
///
/// Cheap to clone; every clone feeds the same writer task.
#[derive(Clone, Debug)]
pub struct SendPath {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Text(_) => f.write_str("Text(..)"),
            Outbound::Close => f.write_str("Close"),
        }
    }
}

impl SendPath {
    /// Start the writer task for `writer`, encrypting everything to `recipient`
    ///
    /// The task ends with `Ok` after [`SendPath::close`] (or once every handle
    /// is dropped) and with `Err` on the first failed write.
    pub fn spawn<W>(writer: BlockWriter<W>, recipient: PeerPublicKey) -> (Self, JoinHandle<ChatResult<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drain(rx, writer, recipient));
        (SendPath { tx }, task)
    }

    /// Queue `plaintext` for delivery
    ///
    /// Fails only if the writer task has already stopped.
    pub fn enqueue(&self, plaintext: impl Into<String>) -> ChatResult<()> {
        self.tx
            .send(Outbound::Text(plaintext.into()))
            .map_err(|_| ChatError::SendFailure("send path closed".to_string()))
    }

    /// Flush what is queued, then shut the write half down
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Whether the writer task has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn drain<W>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut writer: BlockWriter<W>,
    recipient: PeerPublicKey,
) -> ChatResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Text(text) => {
                let block = MessageCodec::encode(&text, &recipient)
                    .map_err(|e| ChatError::SendFailure(e.to_string()))?;
                writer
                    .write_block(&block)
                    .await
                    .map_err(|e| ChatError::SendFailure(e.to_string()))?;
            }
            Outbound::Close => break,
        }
    }

    // Refuse anything queued after the close
    rx.close();
    debug!("Send path to {} closing", recipient.fingerprint());
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keypair;
    use crate::transport::memory;

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let ((_, writer), (mut reader, _)) = memory::create_pair();
        let recipient = test_keypair(1);
        let (path, task) = SendPath::spawn(writer, recipient.public_key().clone());

        for i in 0..5 {
            path.enqueue(format!("message {}", i)).unwrap();
        }
        path.close();
        task.await.unwrap().unwrap();

        for i in 0..5 {
            let block = reader.read_block(recipient.block_size()).await.unwrap();
            assert_eq!(
                MessageCodec::decode(&block, recipient).unwrap(),
                format!("message {}", i)
            );
        }
        assert!(reader.read_block(recipient.block_size()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_interleave() {
        let ((_, writer), (mut reader, _)) = memory::create_pair();
        let recipient = test_keypair(1);
        let (path, task) = SendPath::spawn(writer, recipient.public_key().clone());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let path = path.clone();
                tokio::spawn(async move {
                    for i in 0..5 {
                        path.enqueue(format!("p{}-{}", p, i)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        path.close();
        task.await.unwrap().unwrap();

        let mut received = Vec::new();
        for _ in 0..20 {
            let block = reader.read_block(recipient.block_size()).await.unwrap();
            received.push(MessageCodec::decode(&block, recipient).unwrap());
        }
        // Every block decrypts, so none were torn; each producer kept its order
        for p in 0..4 {
            let mine: Vec<_> = received
                .iter()
                .filter(|m| m.starts_with(&format!("p{}-", p)))
                .cloned()
                .collect();
            let expected: Vec<_> = (0..5).map(|i| format!("p{}-{}", p, i)).collect();
            assert_eq!(mine, expected);
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let ((_, writer), (_reader, _)) = memory::create_pair();
        let (path, task) = SendPath::spawn(writer, test_keypair(1).public_key().clone());

        path.close();
        task.await.unwrap().unwrap();

        assert!(path.is_closed());
        assert!(matches!(path.enqueue("late"), Err(ChatError::SendFailure(_))));
    }

    #[tokio::test]
    async fn test_write_failure_ends_task() {
        let ((_, writer), peer) = memory::create_pair();
        drop(peer);
        let (path, task) = SendPath::spawn(writer, test_keypair(1).public_key().clone());

        path.enqueue("into the void").unwrap();
        assert!(matches!(task.await.unwrap(), Err(ChatError::SendFailure(_))));
        assert!(path.enqueue("again").is_err());
    }
}
