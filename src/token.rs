//! Traversal token codec.
//!
//! Encodes traversal state into HMAC-SHA256 signed tokens and verifies
//! them on the way back in. The token is the session: the service keeps
//! no server-side state per client position.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Tokens beyond this size are rejected before any decoding work.
const MAX_TOKEN_BYTES: usize = 4096;

/// A client's position in the synthetic link graph.
///
/// Serialized with single-letter field names in declaration order; the
/// compact payload is what gets signed, so the field order is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalState {
    /// Identifier of the current synthetic node.
    #[serde(rename = "s")]
    pub seed: String,
    /// Distance from the root node.
    #[serde(rename = "d")]
    pub depth: u32,
    /// Sibling position chosen at the parent.
    #[serde(rename = "i")]
    pub index: u32,
    /// Slash-joined path of ancestor seeds, root first.
    #[serde(rename = "c")]
    pub chain: String,
}

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not two dot-separated base64url segments, or oversized.
    #[error("token structure is malformed")]
    Malformed,
    /// Payload decoded but the signature does not match any accepted key.
    #[error("token signature mismatch")]
    SignatureMismatch,
    /// Signature checked out but the payload is not a valid state.
    #[error("token payload failed validation")]
    Schema,
}

/// Signs and verifies traversal tokens.
///
/// Owns the signing key explicitly so the codec is testable in isolation
/// and so a rotation window can hold two accepted keys. Key material is
/// kept behind [`SecretString`] and never appears in debug output.
pub struct TokenCodec {
    key: SecretString,
    /// Accepted for verification only, during a key-rotation window.
    previous_key: Option<SecretString>,
}

impl TokenCodec {
    /// Create a codec signing and verifying with a single key.
    pub fn new(key: SecretString) -> Self {
        Self {
            key,
            previous_key: None,
        }
    }

    /// Additionally accept tokens signed with `previous_key`.
    ///
    /// New tokens are always signed with the current key.
    pub fn with_previous_key(mut self, previous_key: SecretString) -> Self {
        self.previous_key = Some(previous_key);
        self
    }

    /// Encode and sign a state into an opaque token.
    ///
    /// Deterministic for a given key and state.
    pub fn encode(&self, state: &TraversalState) -> String {
        let payload =
            serde_json::to_vec(state).expect("traversal state serializes to JSON");
        let signature = sign(&self.key, &payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Verify and decode a token back into a state.
    ///
    /// Never trusts partially-parsed input: the signature is checked over
    /// the raw payload bytes before any JSON parsing happens.
    pub fn decode(&self, token: &str) -> Result<TraversalState, TokenError> {
        if token.is_empty() || token.len() > MAX_TOKEN_BYTES {
            return Err(TokenError::Malformed);
        }

        let mut parts = token.split('.');
        let encoded_payload = parts.next().ok_or(TokenError::Malformed)?;
        let encoded_sig = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let payload = decode_base64url(encoded_payload)?;
        let supplied_sig = decode_base64url(encoded_sig)?;

        if !self.signature_matches(&payload, &supplied_sig) {
            return Err(TokenError::SignatureMismatch);
        }

        let state: TraversalState =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Schema)?;
        Ok(state)
    }

    /// Constant-time check against the current key, then the rotation key.
    fn signature_matches(&self, payload: &[u8], supplied: &[u8]) -> bool {
        let expected = sign(&self.key, payload);
        if bool::from(expected.ct_eq(supplied)) {
            return true;
        }
        match &self.previous_key {
            Some(previous) => {
                let expected = sign(previous, payload);
                bool::from(expected.ct_eq(supplied))
            }
            None => false,
        }
    }
}

fn sign(key: &SecretString, payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Decode base64url, tolerating padded input from clients that re-add it.
fn decode_base64url(segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| TokenError::Malformed)
}
