//! Bundle Syncer (§4.6, component C6).
//!
//! State machine per repository: `EMPTY -> FULL_ONLY -> INCREMENTAL ->
//! (squash) -> FULL_ONLY`, persisted implicitly via the bundle record
//! chain in the vault. At most one invocation runs concurrently per
//! `(owner-id, name)`; additional invocations serialize on a per-repo
//! lock held across the whole read-chain/produce-bundle/upload sequence
//! (invariant I1). The lock table is a `DashMap` keyed by `(owner,
//! name)`, repurposed from the teacher's use of `dashmap` for object
//! caches.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::errors::ForgeError;
use crate::repo::RepoStore;
use crate::vault::{
    BundleTags, CreateParams, DateSort, QueryFilter, RecordKind, VaultClient, VaultRecord,
    Visibility,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSyncOutcome {
    pub created_bundle: bool,
    pub squashed: bool,
    pub tip_commit: String,
}

/// Per-repository serialization lock table for bundle-sync invocations.
#[derive(Clone, Default)]
pub struct BundleLocks {
    locks: Arc<DashMap<(String, String), Arc<Mutex<()>>>>,
}

impl BundleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, owner_id: &str, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((owner_id.to_string(), name.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Run one bundle-sync invocation for `(owner_id, name)`, serialized
/// against concurrent invocations for the same repository.
pub async fn sync_bundle<V: VaultClient>(
    locks: &BundleLocks,
    store: &RepoStore,
    vault: &V,
    owner_id: &str,
    name: &str,
    repo_context_id: &str,
    visibility: Visibility,
    squash_threshold: u32,
    verify_timeout: Duration,
) -> Result<Option<BundleSyncOutcome>, ForgeError> {
    let lock = locks.lock_for(owner_id, name);
    let _guard = lock.lock().await;

    let chain = read_chain(vault, repo_context_id).await?;

    let current_tip = read_current_tip(store, owner_id, name, verify_timeout).await?;
    let Some(current_tip) = current_tip else {
        // Bare repo has no commits yet; nothing to bundle.
        return Ok(None);
    };

    let prior_tip = chain
        .incrementals
        .last()
        .map(|(_, tags)| tags.tip_commit.clone())
        .or_else(|| chain.full.as_ref().map(|(_, tags)| tags.tip_commit.clone()));

    if prior_tip.as_deref() == Some(current_tip.as_str()) {
        return Ok(None);
    }

    let bundle_file = tempfile::NamedTempFile::new()?;
    let is_full = chain.full.is_none();

    if is_full {
        run_bundle_create(store, owner_id, name, bundle_file.path(), &["--all"], verify_timeout).await?;
    } else {
        let base = prior_tip
            .clone()
            .expect("incremental path implies a prior tip");
        let exclude = format!("^{base}");
        run_bundle_create(
            store,
            owner_id,
            name,
            bundle_file.path(),
            &[current_tip.as_str(), exclude.as_str()],
            verify_timeout,
        )
        .await?;
    }

    verify_bundle(store, owner_id, name, bundle_file.path(), verify_timeout).await?;
    let ref_count = count_heads(store, owner_id, name, bundle_file.path(), verify_timeout).await?;
    let size = tokio::fs::metadata(bundle_file.path()).await?.len();
    let bytes = tokio::fs::read(bundle_file.path()).await?;

    let tags = BundleTags {
        is_full,
        tip_commit: current_tip.clone(),
        base_commit: if is_full { None } else { prior_tip.clone() },
        ref_count,
        size,
    };

    let uploaded = upload_bundle(vault, repo_context_id, &tags, bytes, visibility).await?;

    let mut squashed = false;
    let incremental_count_after = if is_full {
        0
    } else {
        chain.incrementals.len() as u32 + 1
    };

    if !is_full && incremental_count_after >= squash_threshold {
        squash(
            store,
            vault,
            owner_id,
            name,
            repo_context_id,
            &chain,
            &uploaded,
            &current_tip,
            visibility,
            verify_timeout,
        )
        .await?;
        squashed = true;
    }

    Ok(Some(BundleSyncOutcome {
        created_bundle: true,
        squashed,
        tip_commit: current_tip,
    }))
}

struct Chain {
    full: Option<(VaultRecord, BundleTags)>,
    incrementals: Vec<(VaultRecord, BundleTags)>,
}

async fn read_chain<V: VaultClient>(vault: &V, repo_context_id: &str) -> Result<Chain, ForgeError> {
    let records = vault
        .query(
            RecordKind::Bundle,
            QueryFilter::scoped_to(repo_context_id),
            DateSort::Ascending,
        )
        .await
        .map_err(|e| ForgeError::VaultTransient(e.to_string()))?;

    let mut full: Option<(VaultRecord, BundleTags)> = None;
    let mut incrementals = Vec::new();

    for record in records {
        let tags = tags_from_record(&record)?;
        if tags.is_full {
            // A newer full supersedes any prior chain state observed so far.
            full = Some((record, tags));
            incrementals.clear();
        } else {
            incrementals.push((record, tags));
        }
    }

    Ok(Chain { full, incrementals })
}

fn tags_from_record(record: &VaultRecord) -> Result<BundleTags, ForgeError> {
    let is_full: bool = record
        .tag("is_full")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ForgeError::VaultFatal("bundle record missing is_full tag".into()))?;
    let tip_commit = record
        .tag("tip_commit")
        .ok_or_else(|| ForgeError::VaultFatal("bundle record missing tip_commit tag".into()))?
        .to_string();
    let base_commit = record.tag("base_commit").map(|s| s.to_string());
    let ref_count = record
        .tag("ref_count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let size = record.tag("size").and_then(|v| v.parse().ok()).unwrap_or(0);
    Ok(BundleTags {
        is_full,
        tip_commit,
        base_commit,
        ref_count,
        size,
    })
}

async fn read_current_tip(
    store: &RepoStore,
    owner_id: &str,
    name: &str,
    verify_timeout: Duration,
) -> Result<Option<String>, ForgeError> {
    let output = store
        .run_plumbing_timeout(
            owner_id,
            name,
            ["rev-parse", "--verify", "--quiet", "HEAD"],
            verify_timeout,
        )
        .await?;
    if !output.status.success() {
        return Ok(None);
    }
    let tip = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if tip.is_empty() {
        Ok(None)
    } else {
        Ok(Some(tip))
    }
}

async fn run_bundle_create(
    store: &RepoStore,
    owner_id: &str,
    name: &str,
    out_path: &std::path::Path,
    refspec_args: &[&str],
    verify_timeout: Duration,
) -> Result<(), ForgeError> {
    let mut args = vec!["bundle", "create", out_path.to_str().unwrap()];
    args.extend_from_slice(refspec_args);
    let output = store.run_plumbing_timeout(owner_id, name, args, verify_timeout).await?;
    if !output.status.success() {
        return Err(ForgeError::internal(format!(
            "git bundle create failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

async fn verify_bundle(
    store: &RepoStore,
    owner_id: &str,
    name: &str,
    path: &std::path::Path,
    verify_timeout: Duration,
) -> Result<(), ForgeError> {
    let output = store
        .run_plumbing_timeout(
            owner_id,
            name,
            ["bundle", "verify", path.to_str().unwrap()],
            verify_timeout,
        )
        .await?;
    if !output.status.success() {
        return Err(ForgeError::internal(format!(
            "git bundle verify failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

async fn count_heads(
    store: &RepoStore,
    owner_id: &str,
    name: &str,
    path: &std::path::Path,
    verify_timeout: Duration,
) -> Result<u32, ForgeError> {
    let output = store
        .run_plumbing_timeout(
            owner_id,
            name,
            ["bundle", "list-heads", path.to_str().unwrap()],
            verify_timeout,
        )
        .await?;
    if !output.status.success() {
        return Err(ForgeError::internal(format!(
            "git bundle list-heads failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    let count = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();
    Ok(count as u32)
}

async fn upload_bundle<V: VaultClient>(
    vault: &V,
    repo_context_id: &str,
    tags: &BundleTags,
    bytes: Vec<u8>,
    visibility: Visibility,
) -> Result<VaultRecord, ForgeError> {
    let params = CreateParams::new(RecordKind::Bundle, repo_context_id)
        .with_tags(tags.to_tag_map())
        .with_tag("visibility", visibility_tag(visibility))
        .with_blob(bytes)
        .with_data(tags)?;
    vault
        .create(params)
        .await
        .map_err(|e| ForgeError::VaultTransient(e.to_string()))
}

fn visibility_tag(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "public",
        Visibility::Private => "private",
    }
}

/// Produce a fresh full bundle from the current tip, upload it, then
/// erase every strictly-older member of the chain (the previous full,
/// if any, every incremental read before this invocation, and the
/// incremental just uploaded). Idempotent: if called again with an
/// already-squashed chain (a single full, no incrementals), the next
/// invocation's no-op check short-circuits before reaching here.
#[allow(clippy::too_many_arguments)]
async fn squash<V: VaultClient>(
    store: &RepoStore,
    vault: &V,
    owner_id: &str,
    name: &str,
    repo_context_id: &str,
    chain: &Chain,
    just_uploaded: &VaultRecord,
    current_tip: &str,
    visibility: Visibility,
    verify_timeout: Duration,
) -> Result<(), ForgeError> {
    let squash_file = tempfile::NamedTempFile::new()?;
    run_bundle_create(store, owner_id, name, squash_file.path(), &["--all"], verify_timeout).await?;
    verify_bundle(store, owner_id, name, squash_file.path(), verify_timeout).await?;
    let ref_count = count_heads(store, owner_id, name, squash_file.path(), verify_timeout).await?;
    let size = tokio::fs::metadata(squash_file.path()).await?.len();
    let bytes = tokio::fs::read(squash_file.path()).await?;

    let tags = BundleTags {
        is_full: true,
        tip_commit: current_tip.to_string(),
        base_commit: None,
        ref_count,
        size,
    };
    upload_bundle(vault, repo_context_id, &tags, bytes, visibility).await?;

    let mut stale_ids: Vec<String> = chain
        .incrementals
        .iter()
        .map(|(record, _)| record.id.clone())
        .collect();
    if let Some((record, _)) = &chain.full {
        stale_ids.push(record.id.clone());
    }
    stale_ids.push(just_uploaded.id.clone());

    for id in stale_ids {
        if let Err(err) = vault.erase(&id).await {
            tracing::warn!(%err, record_id = %id, "failed to erase superseded bundle record during squash");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;
    use tokio::process::Command;

    async fn repo_with_commits(store: &RepoStore, owner: &str, name: &str, messages: &[&str]) {
        store.init(owner, name).await.unwrap();
        let path = store.repo_path(owner, name);
        let work = tempfile::tempdir().unwrap();
        Command::new("git")
            .args(["clone", path.to_str().unwrap(), work.path().to_str().unwrap()])
            .output()
            .await
            .unwrap();
        Command::new("git")
            .current_dir(work.path())
            .args(["config", "user.email", "a@example.com"])
            .output()
            .await
            .unwrap();
        Command::new("git")
            .current_dir(work.path())
            .args(["config", "user.name", "a"])
            .output()
            .await
            .unwrap();
        for (i, message) in messages.iter().enumerate() {
            std::fs::write(work.path().join("f.txt"), format!("{i}")).unwrap();
            Command::new("git")
                .current_dir(work.path())
                .args(["add", "f.txt"])
                .output()
                .await
                .unwrap();
            Command::new("git")
                .current_dir(work.path())
                .args(["commit", "-m", message])
                .output()
                .await
                .unwrap();
            Command::new("git")
                .current_dir(work.path())
                .args(["push", "origin", "HEAD:refs/heads/main"])
                .output()
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn first_sync_produces_full_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RepoStore::new(tmp.path());
        repo_with_commits(&store, "alice", "repo", &["initial"]).await;

        let vault = MemoryVault::new();
        let locks = BundleLocks::new();
        let outcome = sync_bundle(
            &locks,
            &store,
            &vault,
            "alice",
            "repo",
            "ctx-1",
            Visibility::Public,
            20,
            Duration::from_secs(5),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(outcome.created_bundle);
        assert!(!outcome.squashed);

        let records = vault
            .query(RecordKind::Bundle, QueryFilter::scoped_to("ctx-1"), DateSort::Ascending)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag("is_full"), Some("true"));
    }

    #[tokio::test]
    async fn no_op_when_tip_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RepoStore::new(tmp.path());
        repo_with_commits(&store, "alice", "repo", &["initial"]).await;

        let vault = MemoryVault::new();
        let locks = BundleLocks::new();
        sync_bundle(&locks, &store, &vault, "alice", "repo", "ctx-1", Visibility::Public, 20, Duration::from_secs(5))
            .await
            .unwrap();
        let second = sync_bundle(&locks, &store, &vault, "alice", "repo", "ctx-1", Visibility::Public, 20, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn squash_collapses_chain_to_one_full_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RepoStore::new(tmp.path());
        repo_with_commits(&store, "alice", "repo", &["c1"]).await;

        let vault = MemoryVault::new();
        let locks = BundleLocks::new();
        sync_bundle(&locks, &store, &vault, "alice", "repo", "ctx-1", Visibility::Public, 2, Duration::from_secs(5))
            .await
            .unwrap();

        repo_with_commits(&store, "alice", "repo", &["c2"]).await;
        sync_bundle(&locks, &store, &vault, "alice", "repo", "ctx-1", Visibility::Public, 2, Duration::from_secs(5))
            .await
            .unwrap();

        repo_with_commits(&store, "alice", "repo", &["c3"]).await;
        let outcome = sync_bundle(&locks, &store, &vault, "alice", "repo", "ctx-1", Visibility::Public, 2, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.squashed);

        let records = vault
            .query(RecordKind::Bundle, QueryFilter::scoped_to("ctx-1"), DateSort::Ascending)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag("is_full"), Some("true"));
    }
}
