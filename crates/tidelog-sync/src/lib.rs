//! # tidelog sync
//!
//! Head synchronization for a content-addressed oplog.
//!
//! ## Overview
//!
//! Peers subscribed to a log's topic converge by exchanging the log's
//! current heads: a one-shot push over a direct stream when a peer joins the
//! topic, and a broadcast on every local append. Receivers verify each head
//! by recomputing its content address before delivering it.
//!
//! ## Key properties
//!
//! - **Idempotent**: both delivery paths may hand the consumer the same
//!   head; consumers deduplicate by content address.
//! - **Heads only**: missing interior entries are the log consumer's job to
//!   fetch; the engine never walks the DAG.
//! - **Never terminates on error**: peer and network misbehavior surfaces on
//!   the event feed and is recovered locally.
//!
//! ## Message flow
//!
//! ```text
//! Peer A                                Peer B
//!   |--------- subscribe(topic) -------->|        (pubsub)
//!   |<-- direct channel: heads(A) -------|        (one-shot stream)
//!   |--- direct channel: heads(B) ------>|
//!   |                                    |
//!   |--------- publish(new head) ------->|        (on every append)
//! ```

pub mod channel;
pub mod engine;
pub mod error;
pub mod marshaler;
pub mod transport;

pub use channel::{ChannelMessage, DirectChannel, PROTOCOL};
pub use engine::{Log, OnSynced, SyncConfig, SyncEngine, SyncEvent};
pub use error::{Result, SyncError};
pub use marshaler::{marshal, unmarshal, HeadsEnvelope};
pub use transport::{
    memory::MemoryNetwork, BoxedStream, IncomingStream, PeerId, PubSub, PubSubEvent,
    RawStream, StreamTransport,
};
