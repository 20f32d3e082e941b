//! Client-side signing key abstraction used by the push-credential
//! generator (§4.8) and by tests constructing signed tokens.
//!
//! Verification of the resulting signature happens server-side in
//! `auth::pipeline` via `ring::signature::UnparsedPublicKey`; this module
//! is the signing half, using `ring::signature::Ed25519KeyPair`. `ring`
//! was already a teacher dependency (used there only for
//! `ring::digest` SHA-256 checksums); it is repurposed here for its
//! Ed25519 support rather than adding a new signing crate.

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

use super::resolver::PublicKey;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("key generation failed")]
    KeyGeneration,

    #[error("invalid key material")]
    InvalidKey,
}

/// A detached signature over an encoded push token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKey;
    fn sign(&self, message: &[u8]) -> Signature;
}

/// An Ed25519 keypair held in memory, the default `Signer` implementation
/// used by the credential generator and by tests.
pub struct Ed25519Signer {
    keypair: Ed25519KeyPair,
}

impl Ed25519Signer {
    /// Generate a fresh keypair. Used by the credential-helper binary on
    /// first run and by tests.
    pub fn generate() -> Result<Self, SignerError> {
        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| SignerError::KeyGeneration)?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self, SignerError> {
        let keypair = Ed25519KeyPair::from_pkcs8(bytes).map_err(|_| SignerError::InvalidKey)?;
        Ok(Self { keypair })
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.keypair.public_key().as_ref());
        PublicKey(bytes)
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.keypair.sign(message).as_ref().to_vec())
    }
}
