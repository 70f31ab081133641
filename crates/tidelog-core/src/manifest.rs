//! Database manifests: the content-addressed record a database address
//! points at.
//!
//! The access-controller field was renamed between dialects; the read path
//! accepts either spelling and exposes the canonical name.

use std::collections::BTreeMap;

use bytes::Bytes;
use ipld_core::ipld::Ipld;

use crate::cids;
use crate::entry::Dialect;
use crate::error::{CoreError, Result};

/// A database manifest record.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Database name.
    pub name: String,
    /// Database type tag (e.g. `eventlog`, `keyvalue`).
    pub store_type: String,
    /// Address of the access controller.
    pub access_controller: String,
    /// Optional free-form metadata.
    pub meta: Option<Ipld>,
}

impl Manifest {
    /// Create a manifest. Fails with [`CoreError::InvalidArgument`] when any
    /// required field is missing.
    pub fn new(
        name: impl Into<String>,
        store_type: impl Into<String>,
        access_controller: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let store_type = store_type.into();
        let access_controller = access_controller.into();

        if name.is_empty() {
            return Err(CoreError::InvalidArgument("name is required".into()));
        }
        if store_type.is_empty() {
            return Err(CoreError::InvalidArgument("type is required".into()));
        }
        if access_controller.is_empty() {
            return Err(CoreError::InvalidArgument(
                "access controller is required".into(),
            ));
        }

        Ok(Self {
            name,
            store_type,
            access_controller,
            meta: None,
        })
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: Ipld) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The IPLD document form. The legacy dialect spells the controller
    /// field `access_controller`.
    pub fn document(&self, dialect: Dialect) -> Ipld {
        let controller_key = match dialect {
            Dialect::Legacy => "access_controller",
            Dialect::Current => "accessController",
        };

        let mut doc = BTreeMap::new();
        doc.insert(
            controller_key.to_string(),
            Ipld::String(self.access_controller.clone()),
        );
        if let Some(meta) = &self.meta {
            doc.insert("meta".to_string(), meta.clone());
        }
        doc.insert("name".to_string(), Ipld::String(self.name.clone()));
        doc.insert("type".to_string(), Ipld::String(self.store_type.clone()));
        Ipld::Map(doc)
    }

    /// Encode to a content-addressed blob, returning the bytes and the hash
    /// in the dialect's preferred multibase.
    pub fn encode(&self, dialect: Dialect) -> Result<(Bytes, String)> {
        let bytes = serde_ipld_dagcbor::to_vec(&self.document(dialect))
            .map_err(|e| CoreError::Encoding(e.to_string()))?;
        let hash = dialect.render_cid(&cids::cid_for(&bytes))?;
        Ok((Bytes::from(bytes), hash))
    }

    /// Decode a manifest blob, accepting either controller-field spelling.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let doc: Ipld = serde_ipld_dagcbor::from_slice(bytes)
            .map_err(|e| CoreError::Decoding(e.to_string()))?;
        let Ipld::Map(map) = doc else {
            return Err(CoreError::Decoding("manifest is not a map".into()));
        };

        let get_str = |key: &str| -> Option<String> {
            match map.get(key) {
                Some(Ipld::String(s)) => Some(s.clone()),
                _ => None,
            }
        };

        // The controller is usually an address string; legacy manifests may
        // inline a controller document instead, which carries its address.
        let controller_field = map
            .get("accessController")
            .or_else(|| map.get("access_controller"))
            .ok_or_else(|| CoreError::Decoding("manifest missing access controller".into()))?;
        let access_controller = match controller_field {
            Ipld::String(s) => s.clone(),
            Ipld::Map(inline) => match inline.get("address") {
                Some(Ipld::String(s)) => s.clone(),
                _ => {
                    return Err(CoreError::Decoding(
                        "inline access controller has no address".into(),
                    ))
                }
            },
            _ => return Err(CoreError::Decoding("malformed access controller".into())),
        };

        Ok(Manifest {
            name: get_str("name")
                .ok_or_else(|| CoreError::Decoding("manifest missing name".into()))?,
            store_type: get_str("type")
                .ok_or_else(|| CoreError::Decoding("manifest missing type".into()))?,
            access_controller,
            meta: map.get("meta").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_all_fields() {
        assert!(Manifest::new("", "eventlog", "/ac").is_err());
        assert!(Manifest::new("db", "", "/ac").is_err());
        assert!(Manifest::new("db", "eventlog", "").is_err());
        assert!(Manifest::new("db", "eventlog", "/ac").is_ok());
    }

    #[test]
    fn test_roundtrip_current() {
        let manifest = Manifest::new("db", "eventlog", "/ac/ipfs").unwrap();
        let (bytes, hash) = manifest.encode(Dialect::Current).unwrap();
        assert!(hash.starts_with('z'));
        assert_eq!(Manifest::decode(&bytes).unwrap(), manifest);
    }

    #[test]
    fn test_roundtrip_legacy_field_spelling() {
        let manifest = Manifest::new("db", "keyvalue", "/ac/ipfs").unwrap();
        let (bytes, hash) = manifest.encode(Dialect::Legacy).unwrap();
        assert!(hash.starts_with('b'));

        // The legacy blob spells the field access_controller; the decoder
        // still exposes the canonical name.
        let decoded = Manifest::decode(&bytes).unwrap();
        assert_eq!(decoded.access_controller, "/ac/ipfs");
    }

    #[test]
    fn test_meta_passthrough() {
        let manifest = Manifest::new("db", "eventlog", "/ac")
            .unwrap()
            .with_meta(Ipld::String("extra".into()));
        let (bytes, _) = manifest.encode(Dialect::Current).unwrap();
        let decoded = Manifest::decode(&bytes).unwrap();
        assert_eq!(decoded.meta, Some(Ipld::String("extra".into())));
    }

    #[test]
    fn test_inline_controller_document() {
        let mut inline = std::collections::BTreeMap::new();
        inline.insert("address".to_string(), Ipld::String("/ac/inline".into()));
        let mut doc = std::collections::BTreeMap::new();
        doc.insert("access_controller".to_string(), Ipld::Map(inline));
        doc.insert("name".to_string(), Ipld::String("db".into()));
        doc.insert("type".to_string(), Ipld::String("eventlog".into()));

        let bytes = serde_ipld_dagcbor::to_vec(&Ipld::Map(doc)).unwrap();
        let decoded = Manifest::decode(&bytes).unwrap();
        assert_eq!(decoded.access_controller, "/ac/inline");
    }

    #[test]
    fn test_encoding_deterministic() {
        let manifest = Manifest::new("db", "eventlog", "/ac").unwrap();
        let (_, h1) = manifest.encode(Dialect::Current).unwrap();
        let (_, h2) = manifest.encode(Dialect::Current).unwrap();
        assert_eq!(h1, h2);
    }
}
