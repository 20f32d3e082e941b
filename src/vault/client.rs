//! The record-vault client interface.
//!
//! The vault itself is assumed primitive and out of scope (§1): "a
//! content-addressed store exposing `create(type, {data, tags,
//! parentContextId}) -> {status, record}`, `query(type, {filter,
//! dateSort}) -> {records}`, and per-record `update`, `data.json()`,
//! `data.blob()`". This trait is the core's consumer-side view of that
//! interface, modeled the way the teacher's `RepositoryAccess` trait
//! models the storage layer it consumes: an `async_trait`, `Send + Sync +
//! Clone` bound so it can be cheaply shared across axum request tasks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use super::record::{CreateParams, DateSort, QueryFilter, RecordKind, VaultRecord};

#[derive(Error, Debug)]
pub enum VaultError {
    /// A retriable status (e.g. the vault's backing store was briefly
    /// unavailable). Callers apply bounded retry with backoff (§7).
    #[error("transient vault error: {0}")]
    Transient(String),

    /// Malformed data or a schema violation. Not retried.
    #[error("fatal vault error: {0}")]
    Fatal(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait VaultClient: Send + Sync + Clone {
    /// Create a record. The vault guarantees deduplication by name for
    /// ref records (§3: "Replaced (not appended) on each push").
    async fn create(&self, params: CreateParams) -> Result<VaultRecord, VaultError>;

    /// Query records of a given kind, optionally scoped and tag-filtered,
    /// sorted by creation time.
    async fn query(
        &self,
        kind: RecordKind,
        filter: QueryFilter,
        sort: DateSort,
    ) -> Result<Vec<VaultRecord>, VaultError>;

    /// Overwrite a record's data/tags in place (used by the ref syncer's
    /// upsert-per-push).
    async fn update(
        &self,
        record_id: &str,
        data: Option<serde_json::Value>,
        tags: BTreeMap<String, String>,
    ) -> Result<VaultRecord, VaultError>;

    /// Fetch a record's binary payload (bundle records carry a git bundle
    /// file here).
    async fn blob(&self, record_id: &str) -> Result<Vec<u8>, VaultError>;

    /// Erase a record permanently. Used by the bundle syncer's squash to
    /// delete superseded chain members.
    async fn erase(&self, record_id: &str) -> Result<(), VaultError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    //! An in-memory `VaultClient` test double, grounded in the teacher's
    //! `examples/http_server.rs` `FsRepository`/`AllowAllAuth` pattern of
    //! a small struct implementing the consumed trait directly rather
    //! than a mock framework.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    };

    #[derive(Clone, Default)]
    pub struct MemoryVault {
        inner: Arc<Mutex<Vec<VaultRecord>>>,
        blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        clock: Arc<AtomicI64>,
    }

    impl MemoryVault {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl VaultClient for MemoryVault {
        async fn create(&self, params: CreateParams) -> Result<VaultRecord, VaultError> {
            let mut records = self.inner.lock().unwrap();

            // Ref records are upserted by (parent, kind, name) per §3.
            if params.kind == RecordKind::Ref {
                if let Some(name) = params.tags.get("name") {
                    if let Some(existing) = records.iter_mut().find(|r| {
                        r.kind == RecordKind::Ref
                            && r.parent_context_id == params.parent_context_id
                            && r.tag("name") == Some(name.as_str())
                    }) {
                        existing.data = params.data;
                        existing.tags = params.tags;
                        return Ok(existing.clone());
                    }
                }
            }

            let created_at = self.clock.fetch_add(1, Ordering::SeqCst);
            let record = VaultRecord {
                id: uuid::Uuid::new_v4().to_string(),
                kind: params.kind,
                parent_context_id: params.parent_context_id,
                tags: params.tags,
                data: params.data,
                created_at,
            };
            if let Some(blob) = params.blob {
                self.blobs.lock().unwrap().insert(record.id.clone(), blob);
            }
            records.push(record.clone());
            Ok(record)
        }

        async fn query(
            &self,
            kind: RecordKind,
            filter: QueryFilter,
            sort: DateSort,
        ) -> Result<Vec<VaultRecord>, VaultError> {
            let records = self.inner.lock().unwrap();
            let mut matched: Vec<VaultRecord> = records
                .iter()
                .filter(|r| r.kind == kind)
                .filter(|r| {
                    filter
                        .parent_context_id
                        .as_ref()
                        .is_none_or(|p| &r.parent_context_id == p)
                })
                .filter(|r| {
                    filter
                        .tag_equals
                        .iter()
                        .all(|(k, v)| r.tag(k) == Some(v.as_str()))
                })
                .cloned()
                .collect();
            matched.sort_by_key(|r| r.created_at);
            if sort == DateSort::Descending {
                matched.reverse();
            }
            Ok(matched)
        }

        async fn update(
            &self,
            record_id: &str,
            data: Option<serde_json::Value>,
            tags: BTreeMap<String, String>,
        ) -> Result<VaultRecord, VaultError> {
            let mut records = self.inner.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == record_id)
                .ok_or_else(|| VaultError::NotFound(record_id.to_string()))?;
            record.data = data;
            record.tags = tags;
            Ok(record.clone())
        }

        async fn blob(&self, record_id: &str) -> Result<Vec<u8>, VaultError> {
            self.blobs
                .lock()
                .unwrap()
                .get(record_id)
                .cloned()
                .ok_or_else(|| VaultError::NotFound(record_id.to_string()))
        }

        async fn erase(&self, record_id: &str) -> Result<(), VaultError> {
            let mut records = self.inner.lock().unwrap();
            records.retain(|r| r.id != record_id);
            self.blobs.lock().unwrap().remove(record_id);
            Ok(())
        }
    }
}
