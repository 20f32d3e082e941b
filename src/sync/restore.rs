//! Bundle Restore (§4.7, component C7).
//!
//! Given an empty repository path and a repository context, fetches the
//! most recent full bundle and all newer incrementals from the vault
//! and applies them in order to reconstruct the bare repository. Not
//! re-entrant: a partially-restored repository left behind by a crash
//! is not resumed — callers must delete and retry.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::errors::ForgeError;
use crate::subprocess::run_with_timeout;
use crate::vault::{DateSort, QueryFilter, RecordKind, VaultClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub success: bool,
    pub bundles_applied: u32,
    pub tip_commit: String,
}

pub async fn restore<V: VaultClient>(
    vault: &V,
    target_repo_path: &Path,
    repo_context_id: &str,
    verify_timeout: Duration,
) -> Result<RestoreOutcome, ForgeError> {
    let records = vault
        .query(
            RecordKind::Bundle,
            QueryFilter::scoped_to(repo_context_id),
            DateSort::Ascending,
        )
        .await
        .map_err(|e| ForgeError::VaultTransient(e.to_string()))?;

    let full_index = records
        .iter()
        .rposition(|r| r.tag("is_full") == Some("true"))
        .ok_or_else(|| ForgeError::internal("no-full-bundle: restore chain has no full bundle"))?;

    let chain = &records[full_index..];

    tokio::fs::create_dir_all(target_repo_path).await?;
    let mut init_cmd = Command::new("git");
    init_cmd.arg("init").arg("--bare").arg(target_repo_path);
    let init = run_with_timeout(init_cmd, verify_timeout).await?;
    if !init.status.success() {
        return Err(ForgeError::internal(format!(
            "git init --bare failed during restore: {}",
            String::from_utf8_lossy(&init.stderr)
        )));
    }

    let mut applied = 0u32;
    let mut tip_commit = String::new();

    for record in chain {
        let bytes = vault
            .blob(&record.id)
            .await
            .map_err(|e| ForgeError::VaultTransient(e.to_string()))?;
        let bundle_file = tempfile::NamedTempFile::new()?;
        tokio::fs::write(bundle_file.path(), &bytes).await?;

        let mut verify_cmd = Command::new("git");
        verify_cmd
            .arg("--git-dir")
            .arg(target_repo_path)
            .arg("bundle")
            .arg("verify")
            .arg(bundle_file.path());
        let verify = run_with_timeout(verify_cmd, verify_timeout).await?;
        if !verify.status.success() {
            return Err(ForgeError::internal(format!(
                "bundle chain broken at record {}: {}",
                record.id,
                String::from_utf8_lossy(&verify.stderr)
            )));
        }

        let mut fetch_cmd = Command::new("git");
        fetch_cmd
            .arg("--git-dir")
            .arg(target_repo_path)
            .arg("fetch")
            .arg(bundle_file.path())
            .arg("refs/*:refs/*");
        let fetch = run_with_timeout(fetch_cmd, verify_timeout).await?;
        if !fetch.status.success() {
            return Err(ForgeError::internal(format!(
                "git fetch failed applying bundle record {}: {}",
                record.id,
                String::from_utf8_lossy(&fetch.stderr)
            )));
        }

        applied += 1;
        if let Some(tip) = record.tag("tip_commit") {
            tip_commit = tip.to_string();
        }
    }

    Ok(RestoreOutcome {
        success: true,
        bundles_applied: applied,
        tip_commit,
    })
}
