//! Dialect-aware (de)serialization of sync envelopes.
//!
//! An envelope is `{address, heads}`. The current dialect ships it as
//! DAG-CBOR of the in-memory record. The legacy dialect ships canonical JSON
//! produced with the byte/CID replacer; parsing goes through the heuristic
//! reviver, so fields that a reviver pass may have turned into bytes are
//! normalized back to their original strings (padded base64 re-encoding is
//! exact for any string the strict decoder accepted).

use std::collections::BTreeMap;

use bytes::Bytes;
use ipld_core::ipld::Ipld;
use serde_json::{Map as JsonMap, Value};

use tidelog_core::canonical::{canonical_json, ipld_to_legacy_json, legacy_json_to_ipld};
use tidelog_core::entry::{self, LegacyEntry};
use tidelog_core::identity::{Identity, IdentitySignatures};
use tidelog_core::{Dialect, Entry, LamportClock};

use crate::error::{Result, SyncError};

/// The record exchanged between peers: a log address and its current heads.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadsEnvelope {
    pub address: String,
    pub heads: Vec<Entry>,
}

/// Serialize an envelope for the wire.
pub fn marshal(dialect: Dialect, envelope: &HeadsEnvelope) -> Result<Bytes> {
    match dialect {
        Dialect::Current => marshal_current(envelope),
        Dialect::Legacy => marshal_legacy(envelope),
    }
}

/// Parse an envelope off the wire.
pub fn unmarshal(dialect: Dialect, bytes: &[u8]) -> Result<HeadsEnvelope> {
    match dialect {
        Dialect::Current => unmarshal_current(bytes),
        Dialect::Legacy => unmarshal_legacy(bytes),
    }
}

fn marshal_current(envelope: &HeadsEnvelope) -> Result<Bytes> {
    let mut doc = BTreeMap::new();
    doc.insert(
        "address".to_string(),
        Ipld::String(envelope.address.clone()),
    );
    let heads = envelope
        .heads
        .iter()
        .map(|head| head.document_with_hash().map_err(SyncError::from))
        .collect::<Result<Vec<_>>>()?;
    doc.insert("heads".to_string(), Ipld::List(heads));

    serde_ipld_dagcbor::to_vec(&Ipld::Map(doc))
        .map(Bytes::from)
        .map_err(|e| SyncError::InvalidMessage(e.to_string()))
}

fn unmarshal_current(bytes: &[u8]) -> Result<HeadsEnvelope> {
    let doc: Ipld = serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
    let Ipld::Map(map) = doc else {
        return Err(SyncError::InvalidMessage("envelope is not a map".into()));
    };

    let address = match map.get("address") {
        Some(Ipld::String(s)) => s.clone(),
        _ => return Err(SyncError::InvalidMessage("envelope missing address".into())),
    };

    let heads = match map.get("heads") {
        Some(Ipld::List(items)) => items
            .iter()
            .map(|doc| entry::from_document(doc).map_err(SyncError::from))
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(SyncError::InvalidMessage("envelope missing heads".into())),
    };

    Ok(HeadsEnvelope { address, heads })
}

fn marshal_legacy(envelope: &HeadsEnvelope) -> Result<Bytes> {
    let mut map = JsonMap::new();
    map.insert(
        "address".to_string(),
        Value::String(envelope.address.clone()),
    );
    let heads = envelope
        .heads
        .iter()
        .map(legacy_head_json)
        .collect::<Result<Vec<_>>>()?;
    map.insert("heads".to_string(), Value::Array(heads));

    Ok(Bytes::from(
        canonical_json(&Value::Object(map)).into_bytes(),
    ))
}

fn legacy_head_json(head: &Entry) -> Result<Value> {
    let legacy = head.legacy.as_ref().ok_or_else(|| {
        SyncError::InvalidMessage("head was not signed in the legacy dialect".into())
    })?;

    let mut map = JsonMap::new();
    if let Some(ad) = &legacy.additional_data {
        map.insert("additional_data".to_string(), ad.clone());
    }

    let mut clock = JsonMap::new();
    clock.insert("id".to_string(), Value::String(legacy.clock.id.clone()));
    clock.insert(
        "time".to_string(),
        Value::Number(legacy.clock.time.into()),
    );
    map.insert("clock".to_string(), Value::Object(clock));

    map.insert("hash".to_string(), Value::String(head.hash.clone()));
    map.insert("id".to_string(), Value::String(legacy.id.clone()));

    let mut signatures = JsonMap::new();
    signatures.insert(
        "id".to_string(),
        Value::String(legacy.identity.signatures.id.clone()),
    );
    signatures.insert(
        "publicKey".to_string(),
        Value::String(legacy.identity.signatures.public_key.clone()),
    );
    let mut identity = JsonMap::new();
    identity.insert("id".to_string(), Value::String(legacy.identity.id.clone()));
    identity.insert(
        "publicKey".to_string(),
        Value::String(legacy.identity.public_key.clone()),
    );
    identity.insert("signatures".to_string(), Value::Object(signatures));
    identity.insert(
        "type".to_string(),
        Value::String(legacy.identity.id_type.clone()),
    );
    map.insert("identity".to_string(), Value::Object(identity));

    map.insert("key".to_string(), Value::String(legacy.key.clone()));
    map.insert(
        "next".to_string(),
        Value::Array(legacy.next.iter().cloned().map(Value::String).collect()),
    );
    map.insert("payload".to_string(), Value::String(legacy.payload.clone()));
    map.insert(
        "refs".to_string(),
        Value::Array(legacy.refs.iter().cloned().map(Value::String).collect()),
    );
    map.insert("sig".to_string(), Value::String(legacy.sig.clone()));
    map.insert("v".to_string(), Value::Number(legacy.v.into()));

    Ok(Value::Object(map))
}

fn unmarshal_legacy(bytes: &[u8]) -> Result<HeadsEnvelope> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
    let revived = legacy_json_to_ipld(&value);
    let Ipld::Map(map) = revived else {
        return Err(SyncError::InvalidMessage("envelope is not an object".into()));
    };

    let address = map
        .get("address")
        .and_then(lenient_str)
        .ok_or_else(|| SyncError::InvalidMessage("envelope missing address".into()))?;

    let heads = match map.get("heads") {
        Some(Ipld::List(items)) => items
            .iter()
            .map(legacy_head_from_ipld)
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(SyncError::InvalidMessage("envelope missing heads".into())),
    };

    Ok(HeadsEnvelope { address, heads })
}

fn legacy_head_from_ipld(doc: &Ipld) -> Result<Entry> {
    let Ipld::Map(map) = doc else {
        return Err(SyncError::InvalidMessage("head is not an object".into()));
    };

    let require = |key: &str| -> Result<String> {
        map.get(key)
            .and_then(lenient_str)
            .ok_or_else(|| SyncError::InvalidMessage(format!("head missing field {key}")))
    };

    let clock = match map.get("clock") {
        Some(Ipld::Map(clock)) => {
            let id = clock.get("id").and_then(lenient_str).ok_or_else(|| {
                SyncError::InvalidMessage("head clock missing id".into())
            })?;
            let time = match clock.get("time") {
                Some(Ipld::Integer(i)) => u64::try_from(*i)
                    .map_err(|_| SyncError::InvalidMessage("clock time out of range".into()))?,
                _ => return Err(SyncError::InvalidMessage("head clock missing time".into())),
            };
            LamportClock::new(id, time)
        }
        _ => return Err(SyncError::InvalidMessage("head missing clock".into())),
    };

    let v = match map.get("v") {
        Some(Ipld::Integer(i)) => u64::try_from(*i)
            .map_err(|_| SyncError::InvalidMessage("version marker out of range".into()))?,
        _ => return Err(SyncError::InvalidMessage("head missing version".into())),
    };

    let identity = match map.get("identity") {
        Some(Ipld::Map(identity)) => {
            let field = |key: &str| -> Result<String> {
                identity.get(key).and_then(lenient_str).ok_or_else(|| {
                    SyncError::InvalidMessage(format!("head identity missing field {key}"))
                })
            };
            let signatures = match identity.get("signatures") {
                Some(Ipld::Map(sigs)) => {
                    let sig = |key: &str| -> Result<String> {
                        sigs.get(key).and_then(lenient_str).ok_or_else(|| {
                            SyncError::InvalidMessage(format!(
                                "head identity signatures missing field {key}"
                            ))
                        })
                    };
                    IdentitySignatures {
                        id: sig("id")?,
                        public_key: sig("publicKey")?,
                    }
                }
                _ => {
                    return Err(SyncError::InvalidMessage(
                        "head identity missing signatures".into(),
                    ))
                }
            };
            Identity {
                id: field("id")?,
                public_key: field("publicKey")?,
                signatures,
                id_type: field("type")?,
            }
        }
        _ => return Err(SyncError::InvalidMessage("head missing identity".into())),
    };

    let legacy = LegacyEntry {
        id: require("id")?,
        payload: require("payload")?,
        next: lenient_str_list(map.get("next"), "next")?,
        refs: lenient_str_list(map.get("refs"), "refs")?,
        clock,
        v,
        additional_data: match map.get("additional_data") {
            Some(ad) => Some(ipld_to_legacy_json(ad).map_err(SyncError::from)?),
            None => None,
        },
        key: require("key")?,
        sig: require("sig")?,
        identity,
    };
    let advertised = require("hash")?;

    let mut head = entry::entry_from_legacy(legacy)?;
    let (bytes, _) = head.encode_document()?;
    head.bytes = bytes;
    head.hash = advertised;
    Ok(head)
}

/// A string field that the reviver may have turned into bytes; padded base64
/// re-encoding recovers the original exactly.
fn lenient_str(value: &Ipld) -> Option<String> {
    match value {
        Ipld::String(s) => Some(s.clone()),
        Ipld::Bytes(b) => tidelog_core::encode_str(b, tidelog_core::Encoding::Base64).ok(),
        _ => None,
    }
}

fn lenient_str_list(value: Option<&Ipld>, key: &str) -> Result<Vec<String>> {
    match value {
        Some(Ipld::List(items)) => items
            .iter()
            .map(|item| {
                lenient_str(item).ok_or_else(|| {
                    SyncError::InvalidMessage(format!("head field {key} holds a non-string"))
                })
            })
            .collect(),
        _ => Err(SyncError::InvalidMessage(format!(
            "head missing field {key}"
        ))),
    }
}
