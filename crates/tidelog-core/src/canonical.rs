//! Canonical JSON and legacy value coercions.
//!
//! The legacy dialect signs over JSON with every object's keys in ascending
//! code-point order, no whitespace, and fixed numeric forms. `serde_json`'s
//! default `Map` is `BTreeMap`-backed, so emission from a [`serde_json::Value`]
//! tree is already sorted at every nesting level; [`canonical_json`] pins that
//! behavior down as the signing-image serializer.
//!
//! The replacer/reviver pair translates between IPLD value trees and the
//! legacy JSON conventions: raw bytes travel as padded base64 strings and
//! content identifiers as their multibase string form. The reviver is
//! heuristic and therefore ambiguous (a short ASCII string may well decode as
//! base64); callers that round-trip such values normalize after parsing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ipld_core::ipld::Ipld;
use serde_json::{Map as JsonMap, Number, Value};
use std::collections::BTreeMap;

use crate::cids;
use crate::error::{CoreError, Result};

/// Serialize a JSON value with sorted keys and no whitespace.
///
/// Stable under permutation of input object keys: the value tree itself is
/// ordered, so two trees with the same contents emit identical bytes.
pub fn canonical_json(value: &Value) -> String {
    // Value::Object is BTreeMap-backed; compact emission is canonical as-is.
    value.to_string()
}

/// Replacer: lower an IPLD tree into legacy JSON conventions.
///
/// Bytes become padded base64 strings; links become multibase base58 strings.
pub fn ipld_to_legacy_json(value: &Ipld) -> Result<Value> {
    Ok(match value {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(*b),
        Ipld::Integer(i) => {
            let n = i64::try_from(*i)
                .map_err(|_| CoreError::Encoding(format!("integer out of range: {i}")))?;
            Value::Number(Number::from(n))
        }
        Ipld::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| CoreError::Encoding("non-finite float".into()))?,
        Ipld::String(s) => Value::String(s.clone()),
        Ipld::Bytes(b) => Value::String(BASE64.encode(b)),
        Ipld::List(items) => Value::Array(
            items
                .iter()
                .map(ipld_to_legacy_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Ipld::Map(map) => {
            let mut out = JsonMap::new();
            for (k, v) in map {
                out.insert(k.clone(), ipld_to_legacy_json(v)?);
            }
            Value::Object(out)
        }
        Ipld::Link(cid) => Value::String(cids::to_base58(cid)?),
    })
}

/// Reviver: lift legacy JSON back into an IPLD tree.
///
/// Strings that decode as canonical padded base64 become bytes; a single-key
/// `{"/": <cid>}` object becomes a link; strings with a leading `/` are
/// addresses and stay verbatim.
pub fn legacy_json_to_ipld(value: &Value) -> Ipld {
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
        Value::String(s) => revive_string(s),
        Value::Array(items) => Ipld::List(items.iter().map(legacy_json_to_ipld).collect()),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(s)) = map.get("/") {
                    if let Ok(cid) = cids::parse_cid(s) {
                        return Ipld::Link(cid);
                    }
                }
            }
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), legacy_json_to_ipld(v));
            }
            Ipld::Map(out)
        }
    }
}

fn revive_string(s: &str) -> Ipld {
    // Leading slash marks an address, never base64.
    if s.starts_with('/') {
        return Ipld::String(s.to_string());
    }
    if !s.is_empty() && s.len() % 4 == 0 {
        if let Ok(bytes) = BASE64.decode(s) {
            return Ipld::Bytes(bytes);
        }
    }
    Ipld::String(s.to_string())
}

/// Named byte/string encodings accepted by the coercion helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Hex,
    Base64,
}

impl Encoding {
    /// Resolve an encoding by its conventional name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "hex" | "base16" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown encoding: {other}"
            ))),
        }
    }
}

/// Coerce a string to bytes under the given encoding.
pub fn decode_str(s: &str, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(s.as_bytes().to_vec()),
        Encoding::Hex => hex::decode(s).map_err(|e| CoreError::Decoding(e.to_string())),
        Encoding::Base64 => BASE64.decode(s).map_err(|e| CoreError::Decoding(e.to_string())),
    }
}

/// Coerce bytes to a string under the given encoding.
pub fn encode_str(bytes: &[u8], encoding: Encoding) -> Result<String> {
    match encoding {
        Encoding::Utf8 => String::from_utf8(bytes.to_vec())
            .map_err(|e| CoreError::Encoding(e.to_string())),
        Encoding::Hex => Ok(hex::encode(bytes)),
        Encoding::Base64 => Ok(BASE64.encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let v: Value = serde_json::from_str(r#"{"z":1,"a":{"y":2,"b":3}}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":{"b":3,"y":2},"z":1}"#);
    }

    #[test]
    fn test_canonical_json_permutation_stable() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":[1,2],"z":"s"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"z":"s","x":1,"y":[1,2]}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_canonical_json_compact() {
        let v = json!({"a": 1, "b": [true, null]});
        assert_eq!(canonical_json(&v), r#"{"a":1,"b":[true,null]}"#);
    }

    #[test]
    fn test_replacer_bytes_to_base64() {
        let ipld = Ipld::Bytes(b"hello".to_vec());
        assert_eq!(ipld_to_legacy_json(&ipld).unwrap(), json!("aGVsbG8="));
    }

    #[test]
    fn test_replacer_link_to_base58() {
        let cid = cids::cid_for(b"block");
        let out = ipld_to_legacy_json(&Ipld::Link(cid)).unwrap();
        match out {
            Value::String(s) => assert!(s.starts_with('z')),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn test_reviver_base64_to_bytes() {
        let ipld = legacy_json_to_ipld(&json!("aGVsbG8="));
        assert_eq!(ipld, Ipld::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn test_reviver_preserves_addresses() {
        let ipld = legacy_json_to_ipld(&json!("/orbitdb/zdpuSomething/name"));
        assert_eq!(ipld, Ipld::String("/orbitdb/zdpuSomething/name".into()));
    }

    #[test]
    fn test_reviver_link_object() {
        let cid = cids::cid_for(b"block");
        let s = cids::to_base58(&cid).unwrap();
        let ipld = legacy_json_to_ipld(&json!({ "/": s }));
        assert_eq!(ipld, Ipld::Link(cid));
    }

    #[test]
    fn test_reviver_plain_strings_survive() {
        // Not a multiple of 4 chars, so never mistaken for base64.
        let ipld = legacy_json_to_ipld(&json!("hello"));
        assert_eq!(ipld, Ipld::String("hello".into()));
    }

    #[test]
    fn test_coercion_roundtrips() {
        let bytes = b"\x00\x01binary\xff".to_vec();
        for encoding in [Encoding::Hex, Encoding::Base64] {
            let s = encode_str(&bytes, encoding).unwrap();
            assert_eq!(decode_str(&s, encoding).unwrap(), bytes);
        }
        assert_eq!(decode_str("abc", Encoding::Utf8).unwrap(), b"abc");
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!(Encoding::from_name("base16").unwrap(), Encoding::Hex);
        assert_eq!(Encoding::from_name("utf-8").unwrap(), Encoding::Utf8);
        assert!(Encoding::from_name("rot13").is_err());
    }
}
