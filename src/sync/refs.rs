//! Ref Syncer (§4.5, component C5).
//!
//! After an accepted push, reads the refs from the bare repo and upserts
//! one metadata record per ref into the vault, scoped to the
//! repository's context. Ref enumeration shells out to
//! `git for-each-ref`, the same `tokio::process::Command` pattern as
//! `repo::store::RepoStore`, grounded in the teacher's
//! `examples/http_server.rs` `run_git(["show-ref", "--head"])`.

use crate::errors::ForgeError;
use crate::repo::RepoStore;
use crate::vault::{CreateParams, RecordKind, RefData, RefKind, VaultClient};

/// Enumerate refs and upsert a `ref` record per branch/tag. Individual
/// record failures are logged and skipped; a total failure to enumerate
/// refs is surfaced. Returns the number of refs successfully synced.
pub async fn sync_refs<V: VaultClient>(
    store: &RepoStore,
    vault: &V,
    owner_id: &str,
    name: &str,
    repo_context_id: &str,
) -> Result<usize, ForgeError> {
    let output = store
        .run_plumbing(
            owner_id,
            name,
            ["for-each-ref", "--format=%(objectname) %(refname) %(objecttype)"],
        )
        .await?;

    if !output.status.success() {
        return Err(ForgeError::internal(format!(
            "git for-each-ref failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut synced = 0usize;

    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(target), Some(refname), Some(_objecttype)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };

        let kind = if refname.starts_with("refs/heads/") {
            RefKind::Branch
        } else if refname.starts_with("refs/tags/") {
            RefKind::Tag
        } else {
            continue;
        };

        let data = RefData {
            name: refname.to_string(),
            kind,
            target: target.to_string(),
        };

        let params = match CreateParams::new(RecordKind::Ref, repo_context_id)
            .with_tag("name", refname)
            .with_data(&data)
        {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(%err, refname, "failed to serialize ref record; skipping");
                continue;
            }
        };

        match vault.create(params).await {
            Ok(_) => synced += 1,
            Err(err) => {
                tracing::warn!(%err, refname, "failed to upsert ref record; skipping");
            }
        }
    }

    Ok(synced)
}
