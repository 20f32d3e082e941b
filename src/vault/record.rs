//! Record types stored in the record vault.
//!
//! The vault itself is an external primitive (§1, "Explicitly out of
//! scope"): a content-addressed store exposing `create`, `query`, and
//! per-record `update`/`data.json()`/`data.blob()`. This module models the
//! closed set of record kinds the core actually writes and reads — repo,
//! role, ref, and bundle records — as a tagged variant per the design
//! note in the specification ("a systems-language reimplementation should
//! model records as a tagged variant per protocol plus a fixed tag schema
//! per variant").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The four record kinds the core is aware of. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Repo,
    Maintainer,
    Triager,
    Contributor,
    Ref,
    Bundle,
}

impl RecordKind {
    /// The three role kinds, in the order the authorization policy checks
    /// them.
    pub const ROLES: [RecordKind; 3] = [
        RecordKind::Maintainer,
        RecordKind::Triager,
        RecordKind::Contributor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Repo => "repo",
            RecordKind::Maintainer => "maintainer",
            RecordKind::Triager => "triager",
            RecordKind::Contributor => "contributor",
            RecordKind::Ref => "ref",
            RecordKind::Bundle => "bundle",
        }
    }
}

/// Visibility of a repository, carried on the repo record and passed
/// through to the bundle syncer (the core does not implement encryption
/// for private bundles; it only passes the flag to the vault layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

/// Data payload of a `repo` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoData {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    pub visibility: Visibility,
}

/// Git reference kind, distinguished by the `refs/heads/` vs `refs/tags/`
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

/// Data payload of a `ref` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefData {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RefKind,
    pub target: String,
}

/// Tags carried on a `bundle` record. Bundle binary payload is the git
/// bundle file itself and is fetched separately via `data.blob()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleTags {
    pub is_full: bool,
    pub tip_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    pub ref_count: u32,
    pub size: u64,
}

impl BundleTags {
    /// Project onto the string-valued tag map `CreateParams`/`QueryFilter`
    /// operate on.
    pub fn to_tag_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("is_full".to_string(), self.is_full.to_string());
        map.insert("tip_commit".to_string(), self.tip_commit.clone());
        if let Some(base) = &self.base_commit {
            map.insert("base_commit".to_string(), base.clone());
        }
        map.insert("ref_count".to_string(), self.ref_count.to_string());
        map.insert("size".to_string(), self.size.to_string());
        map
    }
}

/// A generic record as stored in / returned from the vault: an opaque id,
/// its kind, a tag map for querying, and a parent context id scoping it to
/// a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: String,
    pub kind: RecordKind,
    pub parent_context_id: String,
    pub tags: BTreeMap<String, String>,
    /// JSON data payload (absent for pure-binary records like bundles
    /// until fetched via `data.blob()`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Monotonically increasing per-repository creation order; the vault
    /// guarantees this defines replay order for bundles (§3).
    pub created_at: i64,
}

impl VaultRecord {
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(
            self.data
                .clone()
                .unwrap_or(serde_json::Value::Null),
        )
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }
}

/// Parameters for `VaultClient::create`.
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub kind: RecordKind,
    pub parent_context_id: String,
    pub data: Option<serde_json::Value>,
    pub blob: Option<Vec<u8>>,
    pub tags: BTreeMap<String, String>,
}

impl CreateParams {
    pub fn new(kind: RecordKind, parent_context_id: impl Into<String>) -> Self {
        Self {
            kind,
            parent_context_id: parent_context_id.into(),
            data: None,
            blob: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn with_blob(mut self, blob: Vec<u8>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// Filter for `VaultClient::query`. A record matches iff its kind equals
/// the query kind, its `parent_context_id` equals `parent_context_id`
/// (when given), and every `(key, value)` pair in `tag_equals` matches a
/// tag on the record.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub parent_context_id: Option<String>,
    pub tag_equals: BTreeMap<String, String>,
}

impl QueryFilter {
    pub fn scoped_to(parent_context_id: impl Into<String>) -> Self {
        Self {
            parent_context_id: Some(parent_context_id.into()),
            tag_equals: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag_equals.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSort {
    Ascending,
    Descending,
}
