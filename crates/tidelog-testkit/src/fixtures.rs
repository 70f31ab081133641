//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: deterministic authors and entry
//! factories for both dialects.

use std::collections::BTreeMap;

use tidelog_core::{entry, Dialect, Entry, IdentityProvider, Ipld, Keypair, KeypairIdentity};

/// A test author: a deterministic identity provider plus entry factories.
pub struct TestAuthor {
    pub provider: KeypairIdentity,
}

impl TestAuthor {
    /// Create an author with a random keypair.
    pub fn new() -> Self {
        Self {
            provider: KeypairIdentity::generate().expect("identity construction"),
        }
    }

    /// Create with a deterministic keypair from a seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            provider: KeypairIdentity::new(Keypair::from_seed(&seed))
                .expect("identity construction"),
        }
    }

    /// The author's public key, hex encoded.
    pub fn public_key(&self) -> String {
        self.provider.identity().public_key.clone()
    }

    /// Create a root entry with a string payload.
    pub fn make_entry(&self, dialect: Dialect, log_id: &str, payload: &str) -> Entry {
        entry::create(
            &self.provider,
            dialect,
            log_id,
            Ipld::String(payload.to_string()),
            None,
            None,
            None,
        )
        .expect("entry creation")
    }

    /// Create an entry carrying an operation record `{op, key, value}` with
    /// a byte-valued `value`.
    pub fn make_op(
        &self,
        dialect: Dialect,
        log_id: &str,
        op: &str,
        key: &str,
        value: &[u8],
    ) -> Entry {
        let mut payload = BTreeMap::new();
        payload.insert("op".to_string(), Ipld::String(op.to_string()));
        payload.insert("key".to_string(), Ipld::String(key.to_string()));
        payload.insert("value".to_string(), Ipld::Bytes(value.to_vec()));

        entry::create(
            &self.provider,
            dialect,
            log_id,
            Ipld::Map(payload),
            None,
            None,
            None,
        )
        .expect("entry creation")
    }

    /// Create an entry chained after `prev`.
    pub fn make_chained(
        &self,
        dialect: Dialect,
        log_id: &str,
        payload: &str,
        prev: &Entry,
    ) -> Entry {
        let prev_cid = tidelog_core::parse_cid(&prev.hash).expect("prev hash");
        entry::create(
            &self.provider,
            dialect,
            log_id,
            Ipld::String(payload.to_string()),
            Some(prev.clock.tick()),
            Some(vec![prev_cid]),
            None,
        )
        .expect("entry creation")
    }
}

impl Default for TestAuthor {
    fn default() -> Self {
        Self::new()
    }
}

/// Create several authors with distinct deterministic keys.
pub fn multi_author(count: usize) -> Vec<TestAuthor> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = 0x5a;
            TestAuthor::with_seed(seed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_core::entry::verify;

    #[test]
    fn test_author_entries_verify() {
        let author = TestAuthor::with_seed([1; 32]);
        for dialect in [Dialect::Current, Dialect::Legacy] {
            let entry = author.make_entry(dialect, "log", "hello");
            assert!(verify(&author.provider, &entry).unwrap());
        }
    }

    #[test]
    fn test_chained_entries() {
        let author = TestAuthor::with_seed([2; 32]);
        let first = author.make_entry(Dialect::Current, "log", "one");
        let second = author.make_chained(Dialect::Current, "log", "two", &first);

        assert!(first.is_parent(&second));
        assert_eq!(second.clock.time, 1);
    }

    #[test]
    fn test_multi_author_distinct_keys() {
        let authors = multi_author(3);
        assert_ne!(authors[0].public_key(), authors[1].public_key());
        assert_ne!(authors[1].public_key(), authors[2].public_key());
    }

    #[test]
    fn test_deterministic_seeding() {
        let a = TestAuthor::with_seed([9; 32]);
        let b = TestAuthor::with_seed([9; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(
            a.make_entry(Dialect::Current, "log", "x").hash,
            b.make_entry(Dialect::Current, "log", "x").hash
        );
    }
}
