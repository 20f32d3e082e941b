//! The push-token payload (§3 "Push token (ephemeral, not stored)").
//!
//! `{did, owner, repo, exp, nonce}`, canonical-JSON-encoded and
//! base64url-encoded. Never persisted server-side.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("malformed base64 token: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed token JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Field order is part of the wire format: it is what makes
/// `serde_json::to_vec` deterministic ("canonical JSON") for this fixed
/// schema, since serde_json serializes struct fields in declaration
/// order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushTokenPayload {
    pub did: String,
    pub owner: String,
    pub repo: String,
    pub exp: i64,
    pub nonce: String,
}

impl PushTokenPayload {
    /// Canonicalize and base64url-encode the payload (§4.8 step 3).
    pub fn encode(&self) -> Result<String, TokenError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a base64url-encoded payload back into its fields (§4.3
    /// step 3: "Parse the token as base64url JSON").
    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let json = URL_SAFE_NO_PAD.decode(encoded)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// (P2) A token with `exp <= now` is always rejected, independent of
    /// signature validity.
    pub fn is_expired(&self, now: i64) -> bool {
        self.exp <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let payload = PushTokenPayload {
            did: "did:key:alice".to_string(),
            owner: "did:key:alice".to_string(),
            repo: "forge".to_string(),
            exp: 1_700_000_300,
            nonce: "abc123".to_string(),
        };
        let encoded = payload.encode().unwrap();
        let decoded = PushTokenPayload::decode(&encoded).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let payload = PushTokenPayload {
            did: "d".into(),
            owner: "o".into(),
            repo: "r".into(),
            exp: 100,
            nonce: "n".into(),
        };
        assert!(payload.is_expired(100));
        assert!(payload.is_expired(101));
        assert!(!payload.is_expired(99));
    }

    #[test]
    fn decode_rejects_malformed_base64() {
        assert!(PushTokenPayload::decode("not valid base64!!").is_err());
    }
}
