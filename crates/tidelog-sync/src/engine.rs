//! The sync engine: peer lifecycle, head exchange, and broadcast.
//!
//! One engine serves one log. It subscribes to the pubsub topic named by the
//! log's id, exchanges heads over the direct channel when peers join the
//! topic, and broadcasts new heads on [`SyncEngine::add`]. Topic
//! notifications (subscription changes and messages) feed a single worker
//! task, so at most one head exchange is in progress at a time and handlers
//! run in arrival order. [`SyncEngine::stop`] drains that queue before
//! returning and never cancels in-flight work.
//!
//! Failure policy: a peer that does not speak the protocol is dropped
//! silently; any other per-peer failure is surfaced as an [`SyncEvent::Error`]
//! and drops the peer; a head whose recomputed content address differs from
//! the advertised one is skipped with an error event, without aborting the
//! rest of its envelope. The engine itself never terminates on error.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tidelog_core::{parse_cid, Dialect, Entry};

use crate::channel::{ChannelMessage, DirectChannel};
use crate::error::{Result, SyncError};
use crate::marshaler::{self, HeadsEnvelope};
use crate::transport::{PeerId, PubSub, PubSubEvent, StreamTransport};

/// The log capability the engine synchronizes.
#[async_trait]
pub trait Log: Send + Sync {
    /// The log identifier; doubles as the pubsub topic name.
    fn id(&self) -> String;

    /// The current frontier of the causal DAG.
    async fn heads(&self) -> Vec<Entry>;
}

/// Callback invoked with the re-encoded bytes of every verified head.
/// Both sync paths may deliver the same head; consumers deduplicate by
/// content address.
pub type OnSynced = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Wire dialect for envelopes and entries.
    pub dialect: Dialect,
    /// Per-dial deadline for the outbound head exchange.
    pub handshake_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Current,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A head exchange with `peer` completed; `heads` is the local frontier
    /// at that moment.
    Join { peer: PeerId, heads: Vec<Entry> },
    /// `peer` left the topic.
    Leave { peer: PeerId },
    /// A recoverable per-peer or per-head failure.
    Error { message: String },
}

struct Shared {
    log: Arc<dyn Log>,
    pubsub: Arc<dyn PubSub>,
    channel: DirectChannel,
    on_synced: OnSynced,
    config: SyncConfig,
    peers: RwLock<HashSet<PeerId>>,
    events: broadcast::Sender<SyncEvent>,
    started: AtomicBool,
}

struct RunState {
    shutdown: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
    inbound: Option<JoinHandle<()>>,
}

/// The sync engine for one log.
pub struct SyncEngine {
    shared: Arc<Shared>,
    state: Mutex<RunState>,
}

impl SyncEngine {
    pub fn new(
        log: Arc<dyn Log>,
        pubsub: Arc<dyn PubSub>,
        transport: Arc<dyn StreamTransport>,
        on_synced: OnSynced,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                log,
                pubsub,
                channel: DirectChannel::new(transport),
                on_synced,
                config,
                peers: RwLock::new(HashSet::new()),
                events,
                started: AtomicBool::new(false),
            }),
            state: Mutex::new(RunState {
                shutdown: None,
                worker: None,
                inbound: None,
            }),
        }
    }

    /// Start syncing. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.shared.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let topic = self.shared.log.id();

        let messages = self.shared.channel.listen().await?;
        let inbound = tokio::spawn(inbound_loop(Arc::clone(&self.shared), messages));

        // Open the event feed before joining the topic so no notification is
        // missed.
        let feed = self.shared.pubsub.events();
        self.shared.pubsub.subscribe(&topic).await?;

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker_loop(
            Arc::clone(&self.shared),
            feed,
            shutdown.clone(),
        ));

        state.shutdown = Some(shutdown);
        state.worker = Some(worker);
        state.inbound = Some(inbound);
        self.shared.started.store(true, Ordering::SeqCst);

        tracing::debug!(%topic, "sync started");
        Ok(())
    }

    /// Stop syncing: drain the work queue, tear down listeners, leave the
    /// topic, clear the peer set. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !self.shared.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.started.store(false, Ordering::SeqCst);

        // Signal the worker and wait for it to finish whatever is already
        // queued. In-flight work is never cancelled.
        if let Some(shutdown) = state.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(worker) = state.worker.take() {
            let _ = worker.await;
        }

        self.shared.channel.close().await?;
        if let Some(inbound) = state.inbound.take() {
            inbound.abort();
        }

        let topic = self.shared.log.id();
        self.shared.pubsub.unsubscribe(&topic).await?;
        self.shared.peers.write().unwrap().clear();

        tracing::debug!(%topic, "sync stopped");
        Ok(())
    }

    /// Broadcast a newly appended head to the topic. A no-op when stopped.
    pub async fn add(&self, entry: Entry) -> Result<()> {
        if !self.shared.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let topic = self.shared.log.id();
        let envelope = HeadsEnvelope {
            address: topic.clone(),
            heads: vec![entry],
        };
        let bytes = marshaler::marshal(self.shared.config.dialect, &envelope)?;
        self.shared.pubsub.publish(&topic, bytes).await
    }

    /// Snapshot of the currently engaged peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.shared.peers.read().unwrap().iter().copied().collect()
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }
}

/// The concurrency-1 queue: topic notifications run one at a time, in
/// arrival order. On shutdown, events already buffered are still processed.
async fn worker_loop(
    shared: Arc<Shared>,
    mut feed: mpsc::UnboundedReceiver<PubSubEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = feed.recv() => match event {
                Some(event) => handle_topic_event(&shared, event).await,
                None => return,
            },
        }
    }

    // Drain the backlog that was queued before the shutdown signal.
    while let Ok(event) = feed.try_recv() {
        handle_topic_event(&shared, event).await;
    }
}

async fn handle_topic_event(shared: &Arc<Shared>, event: PubSubEvent) {
    let topic = shared.log.id();
    match event {
        PubSubEvent::SubscriptionChanged {
            topic: t,
            peer,
            subscribed: true,
        } if t == topic => {
            handle_peer_subscribed(shared, peer).await;
        }
        PubSubEvent::SubscriptionChanged {
            topic: t,
            peer,
            subscribed: false,
        } if t == topic => {
            shared.peers.write().unwrap().remove(&peer);
            let _ = shared.events.send(SyncEvent::Leave { peer });
            tracing::debug!(%peer, "peer left topic");
        }
        PubSubEvent::Message { topic: t, from, data } if t == topic => {
            tracing::trace!(%from, len = data.len(), "envelope from topic");
            handle_envelope(shared, &data).await;
        }
        _ => {}
    }
}

/// A peer joined the topic: engage it and push our heads over the direct
/// channel, under the configured deadline.
async fn handle_peer_subscribed(shared: &Arc<Shared>, peer: PeerId) {
    // Insert-if-absent: a concurrent inbound stream may already have
    // engaged this peer.
    if !shared.peers.write().unwrap().insert(peer) {
        return;
    }

    let heads = shared.log.heads().await;
    let envelope = HeadsEnvelope {
        address: shared.log.id(),
        heads,
    };
    let bytes = match marshaler::marshal(shared.config.dialect, &envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            shared.peers.write().unwrap().remove(&peer);
            let _ = shared.events.send(SyncEvent::Error { message: e.to_string() });
            return;
        }
    };

    let outcome = tokio::time::timeout(
        shared.config.handshake_timeout,
        shared.channel.send(&peer, &bytes),
    )
    .await;

    match outcome {
        Ok(Ok(())) => {
            tracing::debug!(%peer, "heads sent");
        }
        Ok(Err(SyncError::UnsupportedProtocol(_))) => {
            // The peer does not speak the direct channel; not an error.
            shared.peers.write().unwrap().remove(&peer);
            tracing::debug!(%peer, "peer does not speak the direct channel");
        }
        Ok(Err(e)) => {
            shared.peers.write().unwrap().remove(&peer);
            let _ = shared.events.send(SyncEvent::Error { message: e.to_string() });
        }
        Err(_) => {
            shared.peers.write().unwrap().remove(&peer);
            let _ = shared.events.send(SyncEvent::Error {
                message: SyncError::Timeout(format!("head exchange with {peer}")).to_string(),
            });
        }
    }
}

/// Streams accepted on the direct channel: engage the peer, deliver its
/// heads, announce the join.
async fn inbound_loop(shared: Arc<Shared>, mut messages: mpsc::Receiver<ChannelMessage>) {
    while let Some(message) = messages.recv().await {
        let peer = message.remote_peer;
        shared.peers.write().unwrap().insert(peer);

        handle_envelope(&shared, &message.bytes).await;

        if shared.started.load(Ordering::SeqCst) {
            let heads = shared.log.heads().await;
            let _ = shared.events.send(SyncEvent::Join { peer, heads });
            tracing::debug!(%peer, "peer joined");
        }
    }
}

/// Decode an envelope and deliver its heads in order. Every head's document
/// is re-encoded and its content address recomputed; a mismatch drops that
/// head with an error event and the rest of the envelope continues.
async fn handle_envelope(shared: &Arc<Shared>, data: &[u8]) {
    let envelope = match marshaler::unmarshal(shared.config.dialect, data) {
        Ok(envelope) => envelope,
        Err(e) => {
            let _ = shared.events.send(SyncEvent::Error { message: e.to_string() });
            return;
        }
    };

    for head in &envelope.heads {
        let (bytes, computed) = match head.encode_document() {
            Ok(out) => out,
            Err(e) => {
                let _ = shared.events.send(SyncEvent::Error { message: e.to_string() });
                continue;
            }
        };

        let matches = parse_cid(&head.hash).map(|cid| cid == computed);
        match matches {
            Ok(true) => (shared.on_synced)(bytes),
            _ => {
                let mismatch = SyncError::HashMismatch {
                    advertised: head.hash.clone(),
                    computed: computed.to_string(),
                };
                tracing::warn!(%mismatch, "dropping head");
                let _ = shared.events.send(SyncEvent::Error {
                    message: mismatch.to_string(),
                });
            }
        }
    }
}
