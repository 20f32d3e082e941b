//! Cryptographic identity and the signed push-token protocol built on top
//! of it.
//!
//! The identity resolver is an external primitive (§1): "given an
//! identifier, returns the public keys and service endpoints published by
//! that identity." `IdentityResolver` is the core's consumer-side view of
//! that interface, modeled the same way `vault::VaultClient` models the
//! vault: a small `async_trait` the core depends on but does not
//! implement.

pub mod credential;
pub mod resolver;
pub mod signer;
pub mod token;

pub use credential::{generate_push_credential, PushCredential};
pub use resolver::{IdentityResolver, ResolveError};
pub use signer::Signer;
pub use token::{PushTokenPayload, TokenError};
