//! Content-identifier helpers.
//!
//! Every document in the system is addressed by a CIDv1 over the DAG-CBOR
//! codec with a SHA-256 multihash. The textual rendering differs per dialect:
//! the current dialect uses base58btc (`z` prefix), the legacy dialect uses
//! base32 lower (`b` prefix).

use cid::Cid;
use multibase::Base;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Multicodec code for DAG-CBOR.
pub const DAG_CBOR_CODEC: u64 = 0x71;

/// Multihash code for SHA2-256.
pub const SHA2_256_CODE: u64 = 0x12;

/// Compute the CID of a DAG-CBOR block.
pub fn cid_for(bytes: &[u8]) -> Cid {
    let digest = Sha256::digest(bytes);
    // A 32-byte digest always fits the 64-byte multihash buffer.
    let mh = Multihash::wrap(SHA2_256_CODE, &digest).expect("sha-256 digest fits multihash");
    Cid::new_v1(DAG_CBOR_CODEC, mh)
}

/// Render a CID in base58btc multibase (`z` prefix).
pub fn to_base58(cid: &Cid) -> Result<String> {
    cid.to_string_of_base(Base::Base58Btc)
        .map_err(|e| CoreError::Encoding(e.to_string()))
}

/// Render a CID in base32 lower multibase (`b` prefix).
pub fn to_base32(cid: &Cid) -> Result<String> {
    cid.to_string_of_base(Base::Base32Lower)
        .map_err(|e| CoreError::Encoding(e.to_string()))
}

/// Parse a CID from any multibase rendering.
pub fn parse_cid(s: &str) -> Result<Cid> {
    Cid::try_from(s).map_err(|e| CoreError::Decoding(format!("not a cid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_deterministic() {
        let a = cid_for(b"hello");
        let b = cid_for(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, cid_for(b"world"));
    }

    #[test]
    fn test_multibase_prefixes() {
        let cid = cid_for(b"hello");
        assert!(to_base58(&cid).unwrap().starts_with('z'));
        assert!(to_base32(&cid).unwrap().starts_with('b'));
    }

    #[test]
    fn test_parse_roundtrip_either_base() {
        let cid = cid_for(b"some block");
        let b58 = to_base58(&cid).unwrap();
        let b32 = to_base32(&cid).unwrap();
        assert_eq!(parse_cid(&b58).unwrap(), cid);
        assert_eq!(parse_cid(&b32).unwrap(), cid);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_cid("notacid").is_err());
        assert!(parse_cid("").is_err());
    }
}
