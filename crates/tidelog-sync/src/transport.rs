//! Transport capabilities consumed by the sync engine.
//!
//! The engine talks to two transports: a publish/subscribe layer (topic
//! membership and broadcast) and a stream layer (protocol-tagged duplex
//! streams for the direct channel). Both are traits; the in-memory
//! implementations below wire several peers together through channels for
//! tests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

/// Unique identifier for a peer in the mesh.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Events surfaced by the pubsub layer.
#[derive(Debug, Clone)]
pub enum PubSubEvent {
    /// A peer joined or left a topic.
    SubscriptionChanged {
        topic: String,
        peer: PeerId,
        subscribed: bool,
    },
    /// A message arrived on a topic.
    Message {
        topic: String,
        from: PeerId,
        data: Bytes,
    },
}

/// Publish/subscribe capability.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Join a topic.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Leave a topic.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Broadcast raw bytes to a topic. Pubsub preserves message boundaries,
    /// so no framing is applied.
    async fn publish(&self, topic: &str, data: Bytes) -> Result<()>;

    /// Open a feed of subscription changes and messages. Events are
    /// buffered; a consumer that falls behind loses nothing.
    fn events(&self) -> mpsc::UnboundedReceiver<PubSubEvent>;
}

/// A duplex byte stream. Scoped to a single exchange; closed on every exit
/// path.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// Boxed stream handed across the transport boundary.
pub type BoxedStream = Box<dyn RawStream>;

/// An accepted inbound stream.
pub struct IncomingStream {
    pub remote_peer: PeerId,
    pub stream: BoxedStream,
}

/// Protocol-tagged stream capability.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a stream to `peer` under the given protocol identifier.
    ///
    /// Fails with [`SyncError::UnsupportedProtocol`] when the peer is
    /// reachable but has no handler registered for the protocol.
    async fn dial(&self, peer: &PeerId, protocol: &str) -> Result<BoxedStream>;

    /// Register a handler: accepted streams for `protocol` are delivered on
    /// the channel.
    async fn handle(&self, protocol: &str, incoming: mpsc::Sender<IncomingStream>) -> Result<()>;

    /// Unregister the handler for `protocol`.
    async fn unhandle(&self, protocol: &str) -> Result<()>;
}

/// In-memory transports for testing.
///
/// A [`memory::MemoryNetwork`] wires any number of peers together; each peer
/// gets a pubsub handle and a stream-transport handle backed by channels and
/// `tokio::io::duplex` pipes.
pub mod memory {
    use super::*;

    /// Shared state for a simulated mesh.
    pub struct MemoryNetwork {
        inner: RwLock<NetworkInner>,
    }

    struct NetworkInner {
        peers: HashSet<PeerId>,
        topics: HashMap<String, HashSet<PeerId>>,
        events: HashMap<PeerId, Vec<mpsc::UnboundedSender<PubSubEvent>>>,
        handlers: HashMap<(PeerId, String), mpsc::Sender<IncomingStream>>,
    }

    impl MemoryNetwork {
        /// Create an empty network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: RwLock::new(NetworkInner {
                    peers: HashSet::new(),
                    topics: HashMap::new(),
                    events: HashMap::new(),
                    handlers: HashMap::new(),
                }),
            })
        }

        /// Attach a peer, returning its pubsub and stream-transport handles.
        pub fn join(self: &Arc<Self>, peer: PeerId) -> (MemoryPubSub, MemoryStreamTransport) {
            {
                let mut inner = self.inner.write().unwrap();
                inner.peers.insert(peer);
                inner.events.entry(peer).or_default();
            }
            (
                MemoryPubSub {
                    peer,
                    network: Arc::clone(self),
                },
                MemoryStreamTransport {
                    peer,
                    network: Arc::clone(self),
                },
            )
        }

        fn emit(&self, peer: &PeerId, event: PubSubEvent) {
            let mut inner = self.inner.write().unwrap();
            if let Some(senders) = inner.events.get_mut(peer) {
                // Nobody listening (or a dropped receiver) is fine.
                senders.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
    }

    /// Pubsub handle for one peer of a [`MemoryNetwork`].
    pub struct MemoryPubSub {
        peer: PeerId,
        network: Arc<MemoryNetwork>,
    }

    #[async_trait]
    impl PubSub for MemoryPubSub {
        async fn subscribe(&self, topic: &str) -> Result<()> {
            let existing: Vec<PeerId> = {
                let mut inner = self.network.inner.write().unwrap();
                let members = inner.topics.entry(topic.to_string()).or_default();
                if !members.insert(self.peer) {
                    return Ok(());
                }
                members.iter().copied().filter(|p| *p != self.peer).collect()
            };

            // Tell existing members about us, and us about them.
            for member in existing {
                self.network.emit(
                    &member,
                    PubSubEvent::SubscriptionChanged {
                        topic: topic.to_string(),
                        peer: self.peer,
                        subscribed: true,
                    },
                );
                self.network.emit(
                    &self.peer,
                    PubSubEvent::SubscriptionChanged {
                        topic: topic.to_string(),
                        peer: member,
                        subscribed: true,
                    },
                );
            }
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<()> {
            let remaining: Vec<PeerId> = {
                let mut inner = self.network.inner.write().unwrap();
                match inner.topics.get_mut(topic) {
                    Some(members) => {
                        if !members.remove(&self.peer) {
                            return Ok(());
                        }
                        members.iter().copied().collect()
                    }
                    _ => return Ok(()),
                }
            };

            for member in remaining {
                self.network.emit(
                    &member,
                    PubSubEvent::SubscriptionChanged {
                        topic: topic.to_string(),
                        peer: self.peer,
                        subscribed: false,
                    },
                );
            }
            Ok(())
        }

        async fn publish(&self, topic: &str, data: Bytes) -> Result<()> {
            let members: Vec<PeerId> = {
                let inner = self.network.inner.read().unwrap();
                inner
                    .topics
                    .get(topic)
                    .map(|m| m.iter().copied().filter(|p| *p != self.peer).collect())
                    .unwrap_or_default()
            };

            for member in members {
                self.network.emit(
                    &member,
                    PubSubEvent::Message {
                        topic: topic.to_string(),
                        from: self.peer,
                        data: data.clone(),
                    },
                );
            }
            Ok(())
        }

        fn events(&self) -> mpsc::UnboundedReceiver<PubSubEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut inner = self.network.inner.write().unwrap();
            inner.events.entry(self.peer).or_default().push(tx);
            rx
        }
    }

    /// Stream-transport handle for one peer of a [`MemoryNetwork`].
    pub struct MemoryStreamTransport {
        peer: PeerId,
        network: Arc<MemoryNetwork>,
    }

    #[async_trait]
    impl StreamTransport for MemoryStreamTransport {
        async fn dial(&self, peer: &PeerId, protocol: &str) -> Result<BoxedStream> {
            let handler = {
                let inner = self.network.inner.read().unwrap();
                if !inner.peers.contains(peer) {
                    return Err(SyncError::Transport(format!("unknown peer {peer}")));
                }
                inner.handlers.get(&(*peer, protocol.to_string())).cloned()
            };

            let Some(handler) = handler else {
                return Err(SyncError::UnsupportedProtocol(protocol.to_string()));
            };

            let (local, remote) = tokio::io::duplex(64 * 1024);
            handler
                .send(IncomingStream {
                    remote_peer: self.peer,
                    stream: Box::new(remote),
                })
                .await
                .map_err(|_| SyncError::Transport("handler dropped".into()))?;
            Ok(Box::new(local))
        }

        async fn handle(
            &self,
            protocol: &str,
            incoming: mpsc::Sender<IncomingStream>,
        ) -> Result<()> {
            let mut inner = self.network.inner.write().unwrap();
            inner
                .handlers
                .insert((self.peer, protocol.to_string()), incoming);
            Ok(())
        }

        async fn unhandle(&self, protocol: &str) -> Result<()> {
            let mut inner = self.network.inner.write().unwrap();
            inner.handlers.remove(&(self.peer, protocol.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_subscribe_notifies_both_sides() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (pubsub_a, _) = network.join(a);
        let (pubsub_b, _) = network.join(b);

        let mut events_a = pubsub_a.events();
        pubsub_a.subscribe("topic").await.unwrap();

        let mut events_b = pubsub_b.events();
        pubsub_b.subscribe("topic").await.unwrap();

        match events_a.recv().await.unwrap() {
            PubSubEvent::SubscriptionChanged { peer, subscribed, .. } => {
                assert_eq!(peer, b);
                assert!(subscribed);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match events_b.recv().await.unwrap() {
            PubSubEvent::SubscriptionChanged { peer, subscribed, .. } => {
                assert_eq!(peer, a);
                assert!(subscribed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_excludes_sender() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (pubsub_a, _) = network.join(a);
        let (pubsub_b, _) = network.join(b);

        pubsub_a.subscribe("topic").await.unwrap();
        pubsub_b.subscribe("topic").await.unwrap();

        let mut events_a = pubsub_a.events();
        let mut events_b = pubsub_b.events();
        pubsub_a
            .publish("topic", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        match events_b.recv().await.unwrap() {
            PubSubEvent::Message { from, data, .. } => {
                assert_eq!(from, a);
                assert_eq!(&data[..], b"payload");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dial_unsupported_protocol() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, _transport_b) = network.join(b);

        let result = transport_a.dial(&b, "/nope/1.0.0").await;
        assert!(matches!(result, Err(SyncError::UnsupportedProtocol(_))));
    }

    #[tokio::test]
    async fn test_dial_and_stream() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, transport_b) = network.join(b);

        let (tx, mut rx) = mpsc::channel(4);
        transport_b.handle("/test/1.0.0", tx).await.unwrap();

        let mut stream = transport_a.dial(&b, "/test/1.0.0").await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut accepted = rx.recv().await.unwrap();
        assert_eq!(accepted.remote_peer, a);
        let mut buf = Vec::new();
        accepted.stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ping");
    }

    #[tokio::test]
    async fn test_unhandle_removes_handler() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_bytes([0xaa; 32]);
        let b = PeerId::from_bytes([0xbb; 32]);
        let (_, transport_a) = network.join(a);
        let (_, transport_b) = network.join(b);

        let (tx, _rx) = mpsc::channel(4);
        transport_b.handle("/test/1.0.0", tx).await.unwrap();
        transport_b.unhandle("/test/1.0.0").await.unwrap();

        let result = transport_a.dial(&b, "/test/1.0.0").await;
        assert!(matches!(result, Err(SyncError::UnsupportedProtocol(_))));
    }
}
