//! Outbound transport
//!
//! Sends are fire-and-forget: `send` enqueues and returns immediately, and a
//! message accepted by the transport may still be lost downstream.

use crate::framing::{FrameError, JsonLinesCodec};
use bytes::BytesMut;
use rumor_core::{Message, NodeId};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Encoder;
use tracing::{debug, error};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Destination unreachable: {0}")]
    Unreachable(NodeId),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Something that can carry a message towards its `dest`
pub trait Transport: Send + Sync {
    /// Enqueue a message. Must not block on I/O.
    fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// Transport backed by a writer task that owns the output stream
#[derive(Clone)]
pub struct WriterTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl WriterTransport {
    /// Spawn the writer task over `writer` (stdout in production)
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<Result<(), TransportError>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(writer, rx));
        (Self { tx }, handle)
    }
}

impl Transport for WriterTransport {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

/// Drain the queue until every sender is dropped
async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut codec = JsonLinesCodec::new();
    let mut buf = BytesMut::with_capacity(4096);

    while let Some(message) = rx.recv().await {
        buf.clear();
        if let Err(e) = codec.encode(&message, &mut buf) {
            error!("Dropping unencodable message to {}: {}", message.dest, e);
            continue;
        }
        writer.write_all(&buf).await.map_err(FrameError::from)?;
        writer.flush().await.map_err(FrameError::from)?;
    }

    debug!("Writer queue closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumor_core::Payload;

    #[tokio::test]
    async fn test_writer_emits_one_line_per_message() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (transport, handle) = WriterTransport::spawn(client);

        transport
            .send(Message::new("n1".into(), "c1".into(), Payload::BroadcastOk))
            .unwrap();
        transport
            .send(Message::new("n1".into(), "n2".into(), Payload::Forward { message: 9 }))
            .unwrap();
        drop(transport);
        handle.await.unwrap().unwrap();

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out)
            .await
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(Message::decode(lines[0]).unwrap().kind().as_str(), "broadcast_ok");
        assert_eq!(
            Message::decode(lines[1]).unwrap().body.payload,
            Payload::Forward { message: 9 }
        );
    }
}
