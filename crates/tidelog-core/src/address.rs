//! Database addresses: `/orbitdb/<cid>[/<name>]`.

use std::fmt;

use crate::cids;
use crate::error::{CoreError, Result};

/// A parsed database address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// The content address of the database manifest, as it appeared in the
    /// address string.
    pub hash: String,
    /// Optional database name (everything after the hash segment).
    pub name: Option<String>,
    /// The original address string.
    pub address: String,
}

impl Address {
    /// The address scheme.
    pub const PROTOCOL: &'static str = "orbitdb";
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// True iff the string is a well-formed database address.
pub fn is_valid_address(s: &str) -> bool {
    parse_address(s).is_ok()
}

/// Parse a database address.
///
/// The string must start with `/orbitdb/` and its first path segment after
/// the scheme must parse as a content identifier.
pub fn parse_address(s: &str) -> Result<Address> {
    if s.is_empty() {
        return Err(CoreError::InvalidAddress("empty address".into()));
    }
    let prefix = format!("/{}/", Address::PROTOCOL);
    let rest = s
        .strip_prefix(&prefix)
        .ok_or_else(|| CoreError::InvalidAddress(format!("not an {} address: {s}", Address::PROTOCOL)))?;

    let mut segments = rest.splitn(2, '/');
    let hash = segments.next().unwrap_or_default();
    if hash.is_empty() {
        return Err(CoreError::InvalidAddress(format!("missing hash segment: {s}")));
    }
    cids::parse_cid(hash)
        .map_err(|_| CoreError::InvalidAddress(format!("hash segment is not a cid: {s}")))?;

    let name = segments
        .next()
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string());

    Ok(Address {
        hash: hash.to_string(),
        name,
        address: s.to_string(),
    })
}
