//! Deterministic legacy-dialect vectors for interop testing.
//!
//! Every vector is generated from a fixed seed, so any two builds of the
//! codebase must agree on the signing image, the signature, and the content
//! address of each one.

use tidelog_core::{Dialect, Entry};

use crate::fixtures::TestAuthor;

/// A legacy-dialect test vector.
#[derive(Debug, Clone)]
pub struct LegacyVector {
    /// Human-readable name.
    pub name: &'static str,
    /// Seed for deterministic key generation.
    pub seed: [u8; 32],
    /// Log identifier.
    pub log_id: &'static str,
    /// Operation name, or empty for a plain string payload.
    pub op: &'static str,
    /// Operation key.
    pub key: &'static str,
    /// Operation value bytes (base64 encoded on the wire).
    pub value: &'static [u8],
}

/// All legacy vectors.
pub fn all_vectors() -> Vec<LegacyVector> {
    vec![
        LegacyVector {
            name: "put with binary value",
            seed: [0x42; 32],
            log_id: "vector-log",
            op: "PUT",
            key: "k",
            value: b"hello",
        },
        LegacyVector {
            name: "put with empty value",
            seed: [0x42; 32],
            log_id: "vector-log",
            op: "PUT",
            key: "empty",
            value: b"",
        },
        LegacyVector {
            name: "delete",
            seed: [0x07; 32],
            log_id: "vector-log",
            op: "DEL",
            key: "gone",
            value: b"",
        },
    ]
}

/// Materialize the author and signed entry for a vector.
pub fn generate(vector: &LegacyVector) -> (TestAuthor, Entry) {
    let author = TestAuthor::with_seed(vector.seed);
    let entry = author.make_op(
        Dialect::Legacy,
        vector.log_id,
        vector.op,
        vector.key,
        vector.value,
    );
    (author, entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_core::entry::verify;
    use tidelog_core::Ipld;

    #[test]
    fn test_vectors_are_deterministic() {
        for vector in all_vectors() {
            let (_, a) = generate(&vector);
            let (_, b) = generate(&vector);
            assert_eq!(a.hash, b.hash, "vector {}", vector.name);
            assert_eq!(a.sig, b.sig, "vector {}", vector.name);
        }
    }

    #[test]
    fn test_vectors_verify() {
        for vector in all_vectors() {
            let (author, entry) = generate(&vector);
            assert!(verify(&author.provider, &entry).unwrap(), "vector {}", vector.name);
        }
    }

    #[test]
    fn test_wire_payload_is_base64_json() {
        let (_, entry) = generate(&all_vectors()[0]);
        let legacy = entry.legacy.as_ref().unwrap();
        assert_eq!(
            legacy.payload,
            r#"{"key":"k","op":"PUT","value":"aGVsbG8="}"#
        );
    }

    #[test]
    fn test_reconstituted_value_is_binary() {
        let (author, entry) = generate(&all_vectors()[0]);
        let decoded = tidelog_core::entry::decode(&entry.bytes).unwrap();

        match &decoded.payload {
            Ipld::Map(map) => {
                assert_eq!(map.get("value"), Some(&Ipld::Bytes(b"hello".to_vec())));
            }
            other => panic!("expected map payload, got {other:?}"),
        }
        assert!(verify(&author.provider, &decoded).unwrap());
    }
}
