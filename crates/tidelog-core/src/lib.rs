//! # tidelog core
//!
//! Pure primitives for a peer-to-peer, content-addressed oplog: entries in
//! two wire dialects, canonical encodings, identities, content identifiers,
//! database addresses, and manifests.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key types
//!
//! - [`Entry`] - One immutable, signed, content-addressed log operation
//! - [`Dialect`] - The wire format variant (legacy JSON or current DAG-CBOR)
//! - [`Identity`] / [`IdentityProvider`] - Who signs, and how
//! - [`LamportClock`] - The logical clock entries carry
//! - [`Address`] / [`Manifest`] - Database addressing
//!
//! ## Canonicalization
//!
//! The legacy dialect signs over sorted-key JSON; the current dialect signs
//! over DAG-CBOR. See [`canonical`] and [`entry`].

pub mod address;
pub mod canonical;
pub mod cids;
pub mod clock;
pub mod entry;
pub mod error;
pub mod identity;
pub mod manifest;

pub use address::{is_valid_address, parse_address, Address};
pub use canonical::{canonical_json, decode_str, encode_str, Encoding};
pub use cids::{cid_for, parse_cid};
pub use clock::LamportClock;
pub use entry::{Dialect, Entry, LegacyEntry};
pub use error::{CoreError, Result};
pub use identity::{Identity, IdentityProvider, Keypair, KeypairIdentity};
pub use manifest::Manifest;

pub use cid::Cid;
pub use ipld_core::ipld::Ipld;
