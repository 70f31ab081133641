//! Identity documents and the identity-provider capability.
//!
//! An identity is a content-addressed document binding an external id to a
//! signing public key. The current dialect stores only the document's hash on
//! each entry; the legacy dialect inlines the whole document. Signing and
//! verification are delegated to an [`IdentityProvider`] so the core has no
//! opinion on key management.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cids;
use crate::error::{CoreError, Result};

/// Proofs binding the identity id and the signing key together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySignatures {
    /// Signature over the identity id, hex encoded.
    pub id: String,
    /// Signature over `public_key || signatures.id`, hex encoded.
    pub public_key: String,
}

/// An identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// External identifier (for key-pair identities, the hex public key).
    pub id: String,
    /// The signing public key, hex encoded.
    pub public_key: String,
    /// Cross-signatures binding id and key.
    pub signatures: IdentitySignatures,
    /// Identity provider type tag.
    pub id_type: String,
}

impl Identity {
    /// The IPLD document form, used for content addressing and for the
    /// legacy dialect's inline embedding.
    pub fn document(&self) -> Ipld {
        let mut sigs = BTreeMap::new();
        sigs.insert("id".to_string(), Ipld::String(self.signatures.id.clone()));
        sigs.insert(
            "publicKey".to_string(),
            Ipld::String(self.signatures.public_key.clone()),
        );

        let mut doc = BTreeMap::new();
        doc.insert("id".to_string(), Ipld::String(self.id.clone()));
        doc.insert("publicKey".to_string(), Ipld::String(self.public_key.clone()));
        doc.insert("signatures".to_string(), Ipld::Map(sigs));
        doc.insert("type".to_string(), Ipld::String(self.id_type.clone()));
        Ipld::Map(doc)
    }

    /// Content-address of the identity document, rendered base58btc.
    pub fn hash(&self) -> Result<String> {
        let bytes = serde_ipld_dagcbor::to_vec(&self.document())
            .map_err(|e| CoreError::Encoding(e.to_string()))?;
        cids::to_base58(&cids::cid_for(&bytes))
    }

    /// Rebuild an identity from its IPLD document form.
    pub fn from_document(doc: &Ipld) -> Result<Self> {
        let map = match doc {
            Ipld::Map(m) => m,
            _ => return Err(CoreError::Decoding("identity document is not a map".into())),
        };

        let get_str = |key: &str| -> Result<String> {
            match map.get(key) {
                Some(Ipld::String(s)) => Ok(s.clone()),
                _ => Err(CoreError::Decoding(format!("identity missing field {key}"))),
            }
        };

        let signatures = match map.get("signatures") {
            Some(Ipld::Map(sigs)) => {
                let sig_str = |key: &str| -> Result<String> {
                    match sigs.get(key) {
                        Some(Ipld::String(s)) => Ok(s.clone()),
                        _ => Err(CoreError::Decoding(format!(
                            "identity signatures missing field {key}"
                        ))),
                    }
                };
                IdentitySignatures {
                    id: sig_str("id")?,
                    public_key: sig_str("publicKey")?,
                }
            }
            _ => return Err(CoreError::Decoding("identity missing signatures".into())),
        };

        Ok(Identity {
            id: get_str("id")?,
            public_key: get_str("publicKey")?,
            signatures,
            id_type: get_str("type")?,
        })
    }
}

/// The signing/verification capability consumed by entry construction and
/// verification. Implementations own the private key material; the core only
/// ever sees public keys and signatures.
pub trait IdentityProvider: Send + Sync {
    /// The identity this provider signs as.
    fn identity(&self) -> &Identity;

    /// Sign arbitrary bytes, returning the raw signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Verify a signature made by `public_key` (hex) over `data`.
    fn verify(&self, signature: &[u8], public_key: &str, data: &[u8]) -> bool;
}

/// An Ed25519 keypair.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// The public key, hex encoded.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({}...)", &self.public_key_hex()[..8])
    }
}

/// The default identity provider: a self-signed identity backed by a single
/// Ed25519 keypair.
pub struct KeypairIdentity {
    keypair: Keypair,
    identity: Identity,
}

impl KeypairIdentity {
    /// Identity provider type tag.
    pub const TYPE: &'static str = "tidelog";

    /// Build the self-signed identity document for a keypair.
    pub fn new(keypair: Keypair) -> Result<Self> {
        let public_key = keypair.public_key_hex();
        let id = public_key.clone();

        let sig_id = keypair.sign(id.as_bytes());
        let mut key_and_proof = public_key.clone().into_bytes();
        key_and_proof.extend_from_slice(hex::encode(sig_id).as_bytes());
        let sig_key = keypair.sign(&key_and_proof);

        let identity = Identity {
            id,
            public_key,
            signatures: IdentitySignatures {
                id: hex::encode(sig_id),
                public_key: hex::encode(sig_key),
            },
            id_type: Self::TYPE.to_string(),
        };

        Ok(Self { keypair, identity })
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Result<Self> {
        Self::new(Keypair::generate())
    }
}

impl IdentityProvider for KeypairIdentity {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.keypair.sign(data).to_vec())
    }

    fn verify(&self, signature: &[u8], public_key: &str, data: &[u8]) -> bool {
        let Ok(key_bytes) = hex::decode(public_key) else {
            return false;
        };
        let Ok(key_arr) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_arr) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(data, &sig).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Identity {
        Identity {
            id: "02a1".into(),
            public_key: "04ff".into(),
            signatures: IdentitySignatures {
                id: "aa".into(),
                public_key: "bb".into(),
            },
            id_type: "tidelog".into(),
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let identity = sample();
        let doc = identity.document();
        let back = Identity::from_document(&doc).unwrap();
        assert_eq!(identity, back);
    }

    #[test]
    fn test_hash_is_base58() {
        let hash = sample().hash().unwrap();
        assert!(hash.starts_with('z'));
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(sample().hash().unwrap(), sample().hash().unwrap());
    }

    #[test]
    fn test_from_document_rejects_non_map() {
        assert!(Identity::from_document(&Ipld::String("nope".into())).is_err());
    }

    #[test]
    fn test_keypair_identity_self_consistent() {
        let provider = KeypairIdentity::generate().unwrap();
        let identity = provider.identity();

        let sig_id = hex::decode(&identity.signatures.id).unwrap();
        assert!(provider.verify(&sig_id, &identity.public_key, identity.id.as_bytes()));
    }

    #[test]
    fn test_keypair_identity_sign_verify() {
        let provider = KeypairIdentity::generate().unwrap();
        let sig = provider.sign(b"message").unwrap();
        assert!(provider.verify(&sig, &provider.identity().public_key, b"message"));
        assert!(!provider.verify(&sig, &provider.identity().public_key, b"tampered"));
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let a = Keypair::from_seed(&[7; 32]);
        let b = Keypair::from_seed(&[7; 32]);
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn test_verify_rejects_bad_key_encoding() {
        let provider = KeypairIdentity::generate().unwrap();
        let sig = provider.sign(b"m").unwrap();
        assert!(!provider.verify(&sig, "not-hex", b"m"));
        assert!(!provider.verify(&sig, "abcd", b"m"));
    }
}
