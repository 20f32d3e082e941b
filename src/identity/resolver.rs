//! `IdentityResolver` — the external cryptographic-identity primitive
//! (§1, "Explicitly out of scope"). The core only ever needs the
//! resolved public keys to verify a detached signature.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unknown or unresolvable identity: {0}")]
    Unknown(String),

    #[error("identity resolution failed: {0}")]
    Backend(String),
}

/// An Ed25519 public key published by an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 32]);

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve an actor-id (`did`) to its published public key set.
    /// Unknown or unresolvable identities are an error per §4.3 step 6.
    async fn resolve(&self, did: &str) -> Result<Vec<PublicKey>, ResolveError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    //! An in-memory `IdentityResolver` test double: a fixed map from
    //! `did` to public keys, set up by the test itself. Grounded in the
    //! same `examples/http_server.rs` test-double pattern as
    //! `vault::client::memory::MemoryVault`.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MemoryResolver {
        keys: Arc<Mutex<HashMap<String, Vec<PublicKey>>>>,
    }

    impl MemoryResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register(&self, did: impl Into<String>, key: PublicKey) {
            self.keys
                .lock()
                .unwrap()
                .entry(did.into())
                .or_default()
                .push(key);
        }
    }

    #[async_trait]
    impl IdentityResolver for MemoryResolver {
        async fn resolve(&self, did: &str) -> Result<Vec<PublicKey>, ResolveError> {
            self.keys
                .lock()
                .unwrap()
                .get(did)
                .cloned()
                .filter(|keys| !keys.is_empty())
                .ok_or_else(|| ResolveError::Unknown(did.to_string()))
        }
    }
}
