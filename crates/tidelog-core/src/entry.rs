//! Log entries: construction, signing, encoding, decoding, verification.
//!
//! An entry is one immutable operation in a log. Its signed fields are `id`,
//! `payload`, `next`, `refs`, `clock`, and `v`; the attached fields carry the
//! author's key, an identity reference, the signature, and the entry's
//! content address. Two wire dialects exist:
//!
//! - **current** ([`Dialect::Current`]): signed over the DAG-CBOR image of
//!   the six fields, identity stored by hash, content address rendered in
//!   base58btc.
//! - **legacy** ([`Dialect::Legacy`]): signed over canonical JSON with a
//!   `hash: null` placeholder, predecessors as multibase base58 strings,
//!   byte-valued payload fields as padded base64, the identity document
//!   inlined, and the content address rendered in base32.
//!
//! A legacy entry decoded off the wire keeps its original envelope attached
//! so re-verification reproduces the exact signed JSON image; the legacy
//! signing image is not recoverable from the current-dialect fields alone.

use std::collections::BTreeMap;

use bytes::Bytes;
use cid::Cid;
use ipld_core::ipld::Ipld;
use serde_json::{Map as JsonMap, Value};

use crate::canonical::{canonical_json, ipld_to_legacy_json, legacy_json_to_ipld};
use crate::cids;
use crate::clock::LamportClock;
use crate::error::{CoreError, Result};
use crate::identity::{Identity, IdentityProvider};

/// The wire dialect of an entry or envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Legacy JSON-signed format, version marker 1.
    Legacy,
    /// Current DAG-CBOR format, version marker 2.
    Current,
}

impl Dialect {
    /// The `v` field value for this dialect.
    pub fn version(self) -> u64 {
        match self {
            Dialect::Legacy => 1,
            Dialect::Current => 2,
        }
    }

    /// Render a CID in this dialect's preferred multibase.
    pub fn render_cid(self, cid: &Cid) -> Result<String> {
        match self {
            Dialect::Legacy => cids::to_base32(cid),
            Dialect::Current => cids::to_base58(cid),
        }
    }
}

/// The preserved legacy envelope of an entry.
///
/// Field values are kept in their exact wire string forms so the signed JSON
/// image can be reproduced byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEntry {
    pub id: String,
    /// The payload exactly as signed: a UTF-8 string, often itself JSON.
    pub payload: String,
    /// Direct predecessors as multibase base58 strings.
    pub next: Vec<String>,
    /// Skip-list ancestors as multibase base58 strings.
    pub refs: Vec<String>,
    pub clock: LamportClock,
    pub v: u64,
    /// Placeholder field included in the signed image when present.
    pub additional_data: Option<Value>,
    /// Author public key, hex encoded.
    pub key: String,
    /// Signature over the canonical JSON image, hex encoded.
    pub sig: String,
    /// The full identity document, inlined.
    pub identity: Identity,
}

impl LegacyEntry {
    /// The exact byte image passed to the signer: canonical JSON of the
    /// signed fields with a leading `hash: null`.
    pub fn signing_image(&self) -> Result<Vec<u8>> {
        let mut map = JsonMap::new();
        if let Some(ad) = &self.additional_data {
            map.insert("additional_data".to_string(), ad.clone());
        }
        let mut clock = JsonMap::new();
        clock.insert("id".to_string(), Value::String(self.clock.id.clone()));
        clock.insert("time".to_string(), Value::Number(self.clock.time.into()));
        map.insert("clock".to_string(), Value::Object(clock));
        map.insert("hash".to_string(), Value::Null);
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.insert(
            "next".to_string(),
            Value::Array(self.next.iter().cloned().map(Value::String).collect()),
        );
        map.insert("payload".to_string(), Value::String(self.payload.clone()));
        map.insert(
            "refs".to_string(),
            Value::Array(self.refs.iter().cloned().map(Value::String).collect()),
        );
        map.insert("v".to_string(), Value::Number(self.v.into()));

        Ok(canonical_json(&Value::Object(map)).into_bytes())
    }

    /// The IPLD document encoded for content addressing. Inlines the
    /// identity document and carries the `hash: null` placeholder.
    pub fn document(&self) -> Result<Ipld> {
        let mut doc = BTreeMap::new();
        if let Some(ad) = &self.additional_data {
            doc.insert("additional_data".to_string(), plain_json_to_ipld(ad));
        }
        doc.insert("clock".to_string(), clock_document(&self.clock));
        doc.insert("hash".to_string(), Ipld::Null);
        doc.insert("id".to_string(), Ipld::String(self.id.clone()));
        doc.insert("identity".to_string(), self.identity.document());
        doc.insert("key".to_string(), Ipld::String(self.key.clone()));
        doc.insert(
            "next".to_string(),
            Ipld::List(self.next.iter().cloned().map(Ipld::String).collect()),
        );
        doc.insert("payload".to_string(), Ipld::String(self.payload.clone()));
        doc.insert(
            "refs".to_string(),
            Ipld::List(self.refs.iter().cloned().map(Ipld::String).collect()),
        );
        doc.insert("sig".to_string(), Ipld::String(self.sig.clone()));
        doc.insert("v".to_string(), Ipld::Integer(self.v as i128));
        Ok(Ipld::Map(doc))
    }
}

/// A log entry in its in-memory (current-dialect) shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Log identifier; all entries of one log share it.
    pub id: String,
    /// Arbitrary structured payload.
    pub payload: Ipld,
    /// Direct predecessors in the causal DAG. Empty for a root entry.
    pub next: Vec<Cid>,
    /// Non-immediate ancestors for skip-list traversal.
    pub refs: Vec<Cid>,
    /// Logical clock at creation time.
    pub clock: LamportClock,
    /// Dialect marker: 1 legacy, 2 current.
    pub v: u64,
    /// Author public key, hex encoded.
    pub key: String,
    /// Content address of the identity document, base58btc.
    pub identity: String,
    /// Signature over the dialect's signing image, hex encoded.
    pub sig: String,
    /// Content address of the full entry document, in the dialect's
    /// preferred multibase.
    pub hash: String,
    /// The raw encoded document.
    pub bytes: Bytes,
    /// Original envelope for entries that arrived in the legacy dialect.
    pub legacy: Option<LegacyEntry>,
}

impl Entry {
    /// The dialect this entry was signed under.
    pub fn dialect(&self) -> Dialect {
        if self.v == 1 {
            Dialect::Legacy
        } else {
            Dialect::Current
        }
    }

    /// The full IPLD document, without the advertised hash.
    pub fn document(&self) -> Result<Ipld> {
        if let Some(legacy) = &self.legacy {
            return legacy.document();
        }
        let mut doc = BTreeMap::new();
        doc.insert("clock".to_string(), clock_document(&self.clock));
        doc.insert("id".to_string(), Ipld::String(self.id.clone()));
        doc.insert("identity".to_string(), Ipld::String(self.identity.clone()));
        doc.insert("key".to_string(), Ipld::String(self.key.clone()));
        doc.insert(
            "next".to_string(),
            Ipld::List(self.next.iter().copied().map(Ipld::Link).collect()),
        );
        doc.insert("payload".to_string(), self.payload.clone());
        doc.insert(
            "refs".to_string(),
            Ipld::List(self.refs.iter().copied().map(Ipld::Link).collect()),
        );
        doc.insert("sig".to_string(), Ipld::String(self.sig.clone()));
        doc.insert("v".to_string(), Ipld::Integer(self.v as i128));
        Ok(Ipld::Map(doc))
    }

    /// The full document with the advertised hash attached, the form heads
    /// travel in inside sync envelopes.
    pub fn document_with_hash(&self) -> Result<Ipld> {
        let mut doc = match self.document()? {
            Ipld::Map(map) => map,
            other => return Ok(other),
        };
        doc.insert("hash".to_string(), Ipld::String(self.hash.clone()));
        Ok(Ipld::Map(doc))
    }

    /// Encode the full document, returning its bytes and content identifier.
    pub fn encode_document(&self) -> Result<(Bytes, Cid)> {
        let doc = self.document()?;
        let bytes = serde_ipld_dagcbor::to_vec(&doc)
            .map_err(|e| CoreError::Encoding(e.to_string()))?;
        let cid = cids::cid_for(&bytes);
        Ok((Bytes::from(bytes), cid))
    }

    /// The byte image that was (or must be) passed to the signer.
    pub fn signing_image(&self) -> Result<Vec<u8>> {
        if let Some(legacy) = &self.legacy {
            return legacy.signing_image();
        }
        if self.v == 1 {
            return Err(CoreError::InvalidEntry(
                "legacy entry without its original envelope".into(),
            ));
        }
        signing_image_current(&self.id, &self.payload, &self.next, &self.refs, &self.clock)
    }

    /// Two entries are the same entry iff their content addresses match.
    pub fn is_equal(&self, other: &Entry) -> bool {
        self.hash == other.hash
    }

    /// True when `self` is a direct predecessor of `child`.
    pub fn is_parent(&self, child: &Entry) -> bool {
        match cids::parse_cid(&self.hash) {
            Ok(cid) => child.next.contains(&cid),
            Err(_) => false,
        }
    }

    /// All entries in `entries` that name `self` as a direct predecessor.
    pub fn find_children<'a>(&self, entries: &'a [Entry]) -> Vec<&'a Entry> {
        entries.iter().filter(|e| self.is_parent(e)).collect()
    }
}

/// Structural predicate over a decoded document: does this look like an
/// entry at all?
pub fn is_entry(doc: &Ipld) -> bool {
    let Ipld::Map(map) = doc else {
        return false;
    };
    ["id", "payload", "next", "refs", "clock", "v", "key", "sig"]
        .iter()
        .all(|k| map.contains_key(*k))
}

/// Create a complete signed entry.
///
/// `clock` defaults to `{id: author public key, time: 0}`; `next` and `refs`
/// default to empty. Fails with [`CoreError::InvalidArgument`] when the log
/// id is empty or the payload is null.
pub fn create(
    provider: &dyn IdentityProvider,
    dialect: Dialect,
    log_id: &str,
    payload: Ipld,
    clock: Option<LamportClock>,
    next: Option<Vec<Cid>>,
    refs: Option<Vec<Cid>>,
) -> Result<Entry> {
    if log_id.is_empty() {
        return Err(CoreError::InvalidArgument("log id is required".into()));
    }
    if matches!(payload, Ipld::Null) {
        return Err(CoreError::InvalidArgument("payload is required".into()));
    }
    let identity = provider.identity();
    if identity.public_key.is_empty() {
        return Err(CoreError::InvalidArgument("identity is required".into()));
    }

    let next = next.unwrap_or_default();
    let refs = refs.unwrap_or_default();
    let clock = clock.unwrap_or_else(|| LamportClock::start(identity.public_key.clone()));

    let mut entry = match dialect {
        Dialect::Current => {
            let image = signing_image_current(log_id, &payload, &next, &refs, &clock)?;
            let sig = hex::encode(provider.sign(&image)?);
            Entry {
                id: log_id.to_string(),
                payload,
                next,
                refs,
                clock,
                v: 2,
                key: identity.public_key.clone(),
                identity: identity.hash()?,
                sig,
                hash: String::new(),
                bytes: Bytes::new(),
                legacy: None,
            }
        }
        Dialect::Legacy => {
            let payload_str = legacy_payload_string(&payload)?;
            let next_strs = next
                .iter()
                .map(cids::to_base58)
                .collect::<Result<Vec<_>>>()?;
            let refs_strs = refs
                .iter()
                .map(cids::to_base58)
                .collect::<Result<Vec<_>>>()?;

            let mut legacy = LegacyEntry {
                id: log_id.to_string(),
                payload: payload_str,
                next: next_strs,
                refs: refs_strs,
                clock: clock.clone(),
                v: 1,
                additional_data: None,
                key: identity.public_key.clone(),
                sig: String::new(),
                identity: identity.clone(),
            };
            let image = legacy.signing_image()?;
            let sig = hex::encode(provider.sign(&image)?);
            legacy.sig = sig.clone();

            Entry {
                id: log_id.to_string(),
                payload,
                next,
                refs,
                clock,
                v: 1,
                key: identity.public_key.clone(),
                identity: identity.hash()?,
                sig,
                hash: String::new(),
                bytes: Bytes::new(),
                legacy: Some(legacy),
            }
        }
    };

    seal(&mut entry)?;
    Ok(entry)
}

/// Populate `hash` and `bytes` from the entry's document.
pub fn seal(entry: &mut Entry) -> Result<()> {
    let (bytes, cid) = entry.encode_document()?;
    entry.hash = entry.dialect().render_cid(&cid)?;
    entry.bytes = bytes;
    Ok(())
}

/// Verify an entry against its signature.
///
/// Structural absence is an error ([`CoreError::InvalidEntry`]); a failed
/// signature check is an `Ok(false)`, never an error. The signing image is
/// always recomputed from the fields, not read from a cache.
pub fn verify(provider: &dyn IdentityProvider, entry: &Entry) -> Result<bool> {
    if entry.id.is_empty() {
        return Err(CoreError::InvalidEntry("id is required".into()));
    }
    if matches!(entry.payload, Ipld::Null) {
        return Err(CoreError::InvalidEntry("payload is required".into()));
    }
    if entry.v != 1 && entry.v != 2 {
        return Err(CoreError::InvalidEntry(format!(
            "unknown version marker {}",
            entry.v
        )));
    }
    if entry.clock.id.is_empty() {
        return Err(CoreError::InvalidEntry("clock is required".into()));
    }
    if entry.key.is_empty() {
        return Err(CoreError::InvalidEntry("key is required".into()));
    }
    if entry.sig.is_empty() {
        return Err(CoreError::InvalidEntry("signature is required".into()));
    }

    let image = entry.signing_image()?;
    // A signature that is not even hex fails the check, it does not error.
    let Ok(sig) = hex::decode(&entry.sig) else {
        return Ok(false);
    };
    Ok(provider.verify(&sig, &entry.key, &image))
}

/// Decode an entry from its raw document bytes.
///
/// The dialect is inferred from the shape of the `identity` field: a string
/// means the current dialect, a map means a legacy envelope with the
/// identity document inlined.
pub fn decode(bytes: &[u8]) -> Result<Entry> {
    let doc: Ipld = serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|e| CoreError::Decoding(e.to_string()))?;
    let mut entry = from_document(&doc)?;
    // The given bytes are authoritative for the content address.
    let cid = cids::cid_for(bytes);
    entry.hash = entry.dialect().render_cid(&cid)?;
    entry.bytes = Bytes::copy_from_slice(bytes);
    Ok(entry)
}

/// Rebuild an entry from an IPLD document, e.g. a head inside a sync
/// envelope. An advertised `hash` field, if present, is kept as-is so the
/// receiver can check it against a recomputation.
pub fn from_document(doc: &Ipld) -> Result<Entry> {
    let map = match doc {
        Ipld::Map(m) => m,
        _ => return Err(CoreError::Decoding("entry document is not a map".into())),
    };

    let advertised = match map.get("hash") {
        Some(Ipld::String(s)) => Some(s.clone()),
        _ => None,
    };

    let mut entry = match map.get("identity") {
        Some(Ipld::String(_)) => current_from_document(map)?,
        Some(Ipld::Map(_)) => legacy_from_document(map)?,
        _ => {
            return Err(CoreError::Decoding(
                "entry document has no identity field".into(),
            ))
        }
    };

    let (bytes, cid) = entry.encode_document()?;
    entry.bytes = bytes;
    entry.hash = match advertised {
        Some(hash) => hash,
        None => entry.dialect().render_cid(&cid)?,
    };
    Ok(entry)
}

fn current_from_document(map: &BTreeMap<String, Ipld>) -> Result<Entry> {
    let id = require_str(map, "id")?;
    let payload = map
        .get("payload")
        .cloned()
        .ok_or_else(|| CoreError::Decoding("entry missing payload".into()))?;
    let next = require_links(map, "next")?;
    let refs = require_links(map, "refs")?;
    let clock = clock_from_document(
        map.get("clock")
            .ok_or_else(|| CoreError::Decoding("entry missing clock".into()))?,
    )?;
    let v = require_int(map, "v")?;
    if v != 2 {
        return Err(CoreError::Decoding(format!(
            "identity is a reference but version marker is {v}"
        )));
    }

    Ok(Entry {
        id,
        payload,
        next,
        refs,
        clock,
        v,
        key: require_str(map, "key")?,
        identity: require_str(map, "identity")?,
        sig: require_str(map, "sig")?,
        hash: String::new(),
        bytes: Bytes::new(),
        legacy: None,
    })
}

fn legacy_from_document(map: &BTreeMap<String, Ipld>) -> Result<Entry> {
    let identity = Identity::from_document(
        map.get("identity")
            .ok_or_else(|| CoreError::Decoding("entry missing identity".into()))?,
    )?;

    let legacy = LegacyEntry {
        id: require_str(map, "id")?,
        payload: require_str(map, "payload")?,
        next: require_strings(map, "next")?,
        refs: require_strings(map, "refs")?,
        clock: clock_from_document(
            map.get("clock")
                .ok_or_else(|| CoreError::Decoding("entry missing clock".into()))?,
        )?,
        v: require_int(map, "v")?,
        additional_data: match map.get("additional_data") {
            Some(ad) => Some(ipld_to_legacy_json(ad)?),
            None => None,
        },
        key: require_str(map, "key")?,
        sig: require_str(map, "sig")?,
        identity,
    };
    if legacy.v != 1 {
        return Err(CoreError::Decoding(format!(
            "identity is inlined but version marker is {}",
            legacy.v
        )));
    }

    entry_from_legacy(legacy)
}

/// Project a legacy envelope onto the current-dialect shape, keeping the
/// envelope attached for re-verification.
pub fn entry_from_legacy(legacy: LegacyEntry) -> Result<Entry> {
    let next = legacy
        .next
        .iter()
        .map(|s| cids::parse_cid(s))
        .collect::<Result<Vec<_>>>()?;
    let refs = legacy
        .refs
        .iter()
        .map(|s| cids::parse_cid(s))
        .collect::<Result<Vec<_>>>()?;

    // The legacy payload is a string, often a JSON operation record whose
    // byte-valued fields were base64 encoded for signing.
    let payload = match serde_json::from_str::<Value>(&legacy.payload) {
        Ok(value) => legacy_json_to_ipld(&value),
        Err(_) => Ipld::String(legacy.payload.clone()),
    };

    Ok(Entry {
        id: legacy.id.clone(),
        payload,
        next,
        refs,
        clock: legacy.clock.clone(),
        v: legacy.v,
        key: legacy.key.clone(),
        identity: legacy.identity.hash()?,
        sig: legacy.sig.clone(),
        hash: String::new(),
        bytes: Bytes::new(),
        legacy: Some(legacy),
    })
}

fn signing_image_current(
    id: &str,
    payload: &Ipld,
    next: &[Cid],
    refs: &[Cid],
    clock: &LamportClock,
) -> Result<Vec<u8>> {
    let mut doc = BTreeMap::new();
    doc.insert("clock".to_string(), clock_document(clock));
    doc.insert("id".to_string(), Ipld::String(id.to_string()));
    doc.insert(
        "next".to_string(),
        Ipld::List(next.iter().copied().map(Ipld::Link).collect()),
    );
    doc.insert("payload".to_string(), payload.clone());
    doc.insert(
        "refs".to_string(),
        Ipld::List(refs.iter().copied().map(Ipld::Link).collect()),
    );
    doc.insert("v".to_string(), Ipld::Integer(2));
    serde_ipld_dagcbor::to_vec(&Ipld::Map(doc)).map_err(|e| CoreError::Encoding(e.to_string()))
}

/// Lower a structured payload to its legacy string form: strings pass
/// through, anything else becomes canonical JSON with bytes as base64.
fn legacy_payload_string(payload: &Ipld) -> Result<String> {
    match payload {
        Ipld::String(s) => Ok(s.clone()),
        other => Ok(canonical_json(&ipld_to_legacy_json(other)?)),
    }
}

fn clock_document(clock: &LamportClock) -> Ipld {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Ipld::String(clock.id.clone()));
    map.insert("time".to_string(), Ipld::Integer(clock.time as i128));
    Ipld::Map(map)
}

fn clock_from_document(doc: &Ipld) -> Result<LamportClock> {
    let Ipld::Map(map) = doc else {
        return Err(CoreError::Decoding("clock is not a map".into()));
    };
    let id = match map.get("id") {
        Some(Ipld::String(s)) => s.clone(),
        _ => return Err(CoreError::Decoding("clock missing id".into())),
    };
    let time = match map.get("time") {
        Some(Ipld::Integer(i)) => u64::try_from(*i)
            .map_err(|_| CoreError::Decoding("clock time out of range".into()))?,
        _ => return Err(CoreError::Decoding("clock missing time".into())),
    };
    Ok(LamportClock::new(id, time))
}

/// Translate a plain JSON value into IPLD with no legacy heuristics.
fn plain_json_to_ipld(value: &Value) -> Ipld {
    match value {
        Value::Null => Ipld::Null,
        Value::Bool(b) => Ipld::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ipld::Integer(i as i128)
            } else if let Some(u) = n.as_u64() {
                Ipld::Integer(u as i128)
            } else {
                Ipld::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Ipld::String(s.clone()),
        Value::Array(items) => Ipld::List(items.iter().map(plain_json_to_ipld).collect()),
        Value::Object(map) => Ipld::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), plain_json_to_ipld(v)))
                .collect(),
        ),
    }
}

fn require_str(map: &BTreeMap<String, Ipld>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Ipld::String(s)) => Ok(s.clone()),
        _ => Err(CoreError::Decoding(format!("entry missing field {key}"))),
    }
}

fn require_int(map: &BTreeMap<String, Ipld>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(Ipld::Integer(i)) => {
            u64::try_from(*i).map_err(|_| CoreError::Decoding(format!("field {key} out of range")))
        }
        _ => Err(CoreError::Decoding(format!("entry missing field {key}"))),
    }
}

fn require_links(map: &BTreeMap<String, Ipld>, key: &str) -> Result<Vec<Cid>> {
    match map.get(key) {
        Some(Ipld::List(items)) => items
            .iter()
            .map(|item| match item {
                Ipld::Link(cid) => Ok(*cid),
                _ => Err(CoreError::Decoding(format!("field {key} holds a non-link"))),
            })
            .collect(),
        _ => Err(CoreError::Decoding(format!("entry missing field {key}"))),
    }
}

fn require_strings(map: &BTreeMap<String, Ipld>, key: &str) -> Result<Vec<String>> {
    match map.get(key) {
        Some(Ipld::List(items)) => items
            .iter()
            .map(|item| match item {
                Ipld::String(s) => Ok(s.clone()),
                _ => Err(CoreError::Decoding(format!(
                    "field {key} holds a non-string"
                ))),
            })
            .collect(),
        _ => Err(CoreError::Decoding(format!("entry missing field {key}"))),
    }
}
