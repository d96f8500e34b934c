//! Derived client identity for rate limiting and budgeting.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex chars of the user-agent hash kept in the key.
const UA_HASH_LEN: usize = 12;

/// Composite accounting identity: first-hop address plus a hash of the
/// user-agent string.
///
/// The raw user-agent is never part of the key, so the key space stays
/// bounded and the string is not stored twice. Clients behind the same
/// proxy with the same user-agent collide; acceptable for aggregate
/// telemetry.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ClientKey {
    pub ip: String,
    pub ua_hash: String,
}

impl ClientKey {
    /// Derive a key from the first-hop address and the raw user-agent.
    pub fn derive(ip: &str, user_agent: &str) -> Self {
        let digest = Sha256::digest(user_agent.as_bytes());
        Self {
            ip: ip.to_string(),
            ua_hash: hex::encode(digest)[..UA_HASH_LEN].to_string(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.ua_hash)
    }
}

/// Pick the first-hop client address: the first entry of a forwarded-for
/// header if present, otherwise the transport peer address.
pub fn first_hop_ip(forwarded_for: Option<&str>, peer: Option<&str>) -> String {
    forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.unwrap_or("0.0.0.0").to_string())
}
