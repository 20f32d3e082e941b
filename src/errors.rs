//! Error types for the forge core.
//!
//! This module defines a unified error enumeration used across the
//! transport, authentication, and synchronization layers. It integrates
//! with `thiserror` to provide `Display` implementations and error source
//! chaining, and is the single type the HTTP boundary (`transport::http`)
//! converts into responses (see the error-handling design's propagation
//! policy).
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants are grouped by ultimate disposition, not by originating
//!   component.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    /// Malformed Authorization header, invalid signature, expired token,
    /// unknown identity. Always a 401, never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Valid identity without an authorizing role. Deliberately
    /// indistinguishable from `Authentication` at the HTTP boundary.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Missing `service`, unknown route, dumb-HTTP attempt.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `(owner-id, name)` not found on disk and restore failed or was not
    /// attempted.
    #[error("repository not found: {0}/{1}")]
    RepositoryMissing(String, String),

    /// The git subprocess itself reported a rejection; this must surface
    /// to the git client in-band (200 with a git-formatted error packet),
    /// not as an HTTP error.
    #[error("transport-in-band failure: {0}")]
    TransportInBand(String),

    /// Vault operation returned a retriable status and retries were
    /// exhausted.
    #[error("vault transient error: {0}")]
    VaultTransient(String),

    /// Vault returned malformed data or violated its schema.
    #[error("vault fatal error: {0}")]
    VaultFatal(String),

    /// stdin/stdout pump detected no progress within the deadline.
    #[error("subprocess hung: {0}")]
    SubprocessHung(String),

    /// Ref-sync or bundle-sync failed after a successful push. Logged and
    /// absorbed; never surfaced to the git client, which has already seen
    /// the push succeed.
    #[error("post-push callback error: {0}")]
    PostPushCallback(String),

    /// I/O error from the filesystem or a subprocess.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, e.g. a malformed push token or vault
    /// record payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error for conditions with no dedicated variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn repository_missing(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::RepositoryMissing(owner.into(), name.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True if this error must be reported to git as an in-band protocol
    /// failure (200 + error packet) rather than an HTTP error status.
    pub fn is_transport_in_band(&self) -> bool {
        matches!(self, Self::TransportInBand(_))
    }
}
