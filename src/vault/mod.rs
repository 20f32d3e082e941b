//! Client-side view of the record vault (see `client` module docs for the
//! scope boundary).

pub mod client;
pub mod record;

pub use client::{VaultClient, VaultError};
pub use record::{
    BundleTags, CreateParams, DateSort, QueryFilter, RecordKind, RefData, RefKind, RepoData,
    VaultRecord, Visibility,
};

#[cfg(any(test, feature = "test-support"))]
pub use client::memory::MemoryVault;
