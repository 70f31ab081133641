//! Shared harness for sync integration tests: an in-memory log and a fully
//! wired node (log + engine + transports) on a simulated mesh.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use tidelog_core::{entry, Entry};
use tidelog_sync::transport::memory::{MemoryNetwork, MemoryPubSub};
use tidelog_sync::{Log, PeerId, SyncConfig, SyncEngine};

/// A minimal log: tracks the frontier of appended entries.
pub struct MemoryLog {
    id: String,
    heads: RwLock<Vec<Entry>>,
}

impl MemoryLog {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            heads: RwLock::new(Vec::new()),
        })
    }

    /// Append an entry, replacing any head it supersedes. Idempotent by
    /// content address.
    pub fn apply(&self, entry: Entry) {
        let mut heads = self.heads.write().unwrap();
        if heads.iter().any(|h| h.is_equal(&entry)) {
            return;
        }
        heads.retain(|h| !h.is_parent(&entry));
        heads.push(entry);
    }

    pub fn head_hashes(&self) -> Vec<String> {
        self.heads
            .read()
            .unwrap()
            .iter()
            .map(|h| h.hash.clone())
            .collect()
    }
}

#[async_trait]
impl Log for MemoryLog {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn heads(&self) -> Vec<Entry> {
        self.heads.read().unwrap().clone()
    }
}

/// A node on the simulated mesh: log, engine, and a record of everything the
/// engine delivered.
pub struct TestNode {
    pub peer: PeerId,
    pub log: Arc<MemoryLog>,
    pub engine: Arc<SyncEngine>,
    pub pubsub: Arc<MemoryPubSub>,
    pub synced: Arc<Mutex<Vec<Bytes>>>,
}

impl TestNode {
    /// Entries delivered through `on_synced`, decoded.
    pub fn synced_entries(&self) -> Vec<Entry> {
        self.synced
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| entry::decode(bytes).expect("synced bytes decode"))
            .collect()
    }
}

/// Wire a node into the network. The `on_synced` callback decodes each head
/// and applies it to the local log, so join events see the updated frontier.
pub fn make_node(
    network: &Arc<MemoryNetwork>,
    peer: PeerId,
    log_id: &str,
    config: SyncConfig,
) -> TestNode {
    let (pubsub, transport) = network.join(peer);
    let pubsub = Arc::new(pubsub);

    let log = MemoryLog::new(log_id);
    let synced: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

    let on_synced = {
        let log = Arc::clone(&log);
        let synced = Arc::clone(&synced);
        Arc::new(move |bytes: Bytes| {
            if let Ok(decoded) = entry::decode(&bytes) {
                log.apply(decoded);
            }
            synced.lock().unwrap().push(bytes);
        })
    };

    let engine = Arc::new(SyncEngine::new(
        log.clone() as Arc<dyn Log>,
        Arc::clone(&pubsub) as Arc<dyn tidelog_sync::PubSub>,
        Arc::new(transport),
        on_synced,
        config,
    ));

    TestNode {
        peer,
        log,
        engine,
        pubsub,
        synced,
    }
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_until(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within deadline");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
