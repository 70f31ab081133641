//! The direct channel: a one-shot, length-prefixed exchange over a single
//! protocol-tagged stream.
//!
//! Wire format, exactly two frames per stream:
//!
//! ```text
//! frame-1: unsigned-varint( len(payload) )
//! frame-2: <len bytes of payload>
//! ```
//!
//! A receiver that reads a length and then sees a payload of any other size
//! discards the message without emitting anything.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::transport::{BoxedStream, PeerId, StreamTransport};

/// The stream protocol identifier. Fixed for wire compatibility with
/// existing peers.
pub const PROTOCOL: &str = "/go-orbit-db/direct-channel/1.2.0";

/// A message received on the direct channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub remote_peer: PeerId,
    pub bytes: Bytes,
}

/// Direct-channel endpoint over a stream transport.
pub struct DirectChannel {
    transport: Arc<dyn StreamTransport>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DirectChannel {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            listener: Mutex::new(None),
        }
    }

    /// Register the protocol handler and start consuming inbound streams.
    ///
    /// Each accepted stream is read greedily and decoded once; well-formed
    /// messages are delivered on the returned channel.
    pub async fn listen(&self) -> Result<mpsc::Receiver<ChannelMessage>> {
        let (stream_tx, mut stream_rx) = mpsc::channel(64);
        self.transport.handle(PROTOCOL, stream_tx).await?;

        let (msg_tx, msg_rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            while let Some(incoming) = stream_rx.recv().await {
                match read_frame(incoming.stream).await {
                    Some(bytes) => {
                        let message = ChannelMessage {
                            remote_peer: incoming.remote_peer,
                            bytes,
                        };
                        if msg_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(peer = %incoming.remote_peer, "dropping malformed frame");
                    }
                }
            }
        });

        let mut listener = self.listener.lock().await;
        if let Some(old) = listener.replace(task) {
            old.abort();
        }
        Ok(msg_rx)
    }

    /// Dial `peer` under the protocol and send one framed message.
    ///
    /// Transport errors propagate to the caller; the stream is closed on
    /// every exit path.
    pub async fn send(&self, peer: &PeerId, bytes: &[u8]) -> Result<()> {
        let mut stream = self.transport.dial(peer, PROTOCOL).await?;
        let result = write_frame(&mut stream, bytes).await;
        let _ = stream.shutdown().await;
        result
    }

    /// Unregister the handler and stop the listener.
    pub async fn close(&self) -> Result<()> {
        self.transport.unhandle(PROTOCOL).await?;
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

/// Read one length-prefixed message, consuming the stream to its end.
///
/// Returns `None` when the announced and received lengths disagree or the
/// prefix is malformed.
async fn read_frame(mut stream: BoxedStream) -> Option<Bytes> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.ok()?;

    let (len, rest) = unsigned_varint::decode::u64(&buf).ok()?;
    if rest.len() as u64 != len {
        return None;
    }
    Some(Bytes::copy_from_slice(rest))
}

async fn write_frame(stream: &mut BoxedStream, payload: &[u8]) -> Result<()> {
    let mut len_buf = unsigned_varint::encode::u64_buffer();
    let prefix = unsigned_varint::encode::u64(payload.len() as u64, &mut len_buf);

    stream
        .write_all(prefix)
        .await
        .map_err(|e| crate::error::SyncError::Transport(e.to_string()))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| crate::error::SyncError::Transport(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use std::time::Duration;

    #[test]
    fn test_varint_roundtrip() {
        for n in [0u64, 1, 0x7f, 0x80, 300, 0xffff, u32::MAX as u64, u64::MAX] {
            let mut buf = unsigned_varint::encode::u64_buffer();
            let encoded = unsigned_varint::encode::u64(n, &mut buf);
            let (decoded, rest) = unsigned_varint::decode::u64(encoded).unwrap();
            assert_eq!(decoded, n);
            assert!(rest.is_empty());
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, transport_b) = network.join(b);

        let channel_b = DirectChannel::new(Arc::new(transport_b));
        let mut messages = channel_b.listen().await.unwrap();

        let channel_a = DirectChannel::new(Arc::new(transport_a));
        channel_a.send(&b, b"heads envelope").await.unwrap();

        let message = messages.recv().await.unwrap();
        assert_eq!(message.remote_peer, a);
        assert_eq!(&message.bytes[..], b"heads envelope");
    }

    #[tokio::test]
    async fn test_empty_payload_is_valid() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, transport_b) = network.join(b);

        let channel_b = DirectChannel::new(Arc::new(transport_b));
        let mut messages = channel_b.listen().await.unwrap();

        let channel_a = DirectChannel::new(Arc::new(transport_a));
        channel_a.send(&b, b"").await.unwrap();

        let message = messages.recv().await.unwrap();
        assert!(message.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_length_mismatch_dropped_silently() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, transport_b) = network.join(b);

        let channel_b = DirectChannel::new(Arc::new(transport_b));
        let mut messages = channel_b.listen().await.unwrap();

        // Claim 10 bytes, deliver 3.
        let mut stream = transport_a.dial(&b, PROTOCOL).await.unwrap();
        let mut len_buf = unsigned_varint::encode::u64_buffer();
        let prefix = unsigned_varint::encode::u64(10, &mut len_buf);
        stream.write_all(prefix).await.unwrap();
        stream.write_all(b"abc").await.unwrap();
        stream.shutdown().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(100), messages.recv()).await;
        assert!(outcome.is_err(), "mismatched frame must not be delivered");
    }

    #[tokio::test]
    async fn test_send_to_non_speaker_fails() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, _transport_b) = network.join(b);

        let channel_a = DirectChannel::new(Arc::new(transport_a));
        let result = channel_a.send(&b, b"hello").await;
        assert!(matches!(
            result,
            Err(crate::error::SyncError::UnsupportedProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, transport_b) = network.join(b);

        let channel_b = DirectChannel::new(Arc::new(transport_b));
        let _messages = channel_b.listen().await.unwrap();
        channel_b.close().await.unwrap();

        let channel_a = DirectChannel::new(Arc::new(transport_a));
        let result = channel_a.send(&b, b"hello").await;
        assert!(matches!(
            result,
            Err(crate::error::SyncError::UnsupportedProtocol(_))
        ));
    }
}
