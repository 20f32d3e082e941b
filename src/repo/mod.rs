//! Repository Store (§4.1).

pub mod store;

pub use store::{escape, RepoStore};
