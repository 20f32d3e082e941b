//! Authorization Policy (§4.4, component C4).
//!
//! Given `(actor_id, owner_id, name)`: the actor is the owner, or holds a
//! role record scoped to the named repository. Pure over the vault
//! snapshot observed at query time; no caching.

use crate::vault::{DateSort, QueryFilter, RecordKind, VaultClient};

/// Evaluate the authorization policy. `repo_context_id` is the
/// repository record's vault context id (the parent under which role
/// records for this repository live).
pub async fn is_authorized<V: VaultClient>(
    vault: &V,
    actor_id: &str,
    owner_id: &str,
    repo_context_id: &str,
) -> bool {
    if actor_id == owner_id {
        return true;
    }

    for role in RecordKind::ROLES {
        let filter = QueryFilter::scoped_to(repo_context_id).with_tag("did", actor_id);
        match vault.query(role, filter, DateSort::Descending).await {
            Ok(records) if !records.is_empty() => return true,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(%err, ?role, "authorization query failed; denying by default");
                return false;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{CreateParams, MemoryVault};

    #[tokio::test]
    async fn owner_is_always_authorized() {
        let vault = MemoryVault::new();
        assert!(is_authorized(&vault, "alice", "alice", "ctx-1").await);
    }

    #[tokio::test]
    async fn actor_without_role_is_denied() {
        let vault = MemoryVault::new();
        assert!(!is_authorized(&vault, "bob", "alice", "ctx-1").await);
    }

    #[tokio::test]
    async fn actor_with_maintainer_role_is_authorized() {
        let vault = MemoryVault::new();
        vault
            .create(
                CreateParams::new(RecordKind::Maintainer, "ctx-1").with_tag("did", "bob"),
            )
            .await
            .unwrap();
        assert!(is_authorized(&vault, "bob", "alice", "ctx-1").await);
    }

    #[tokio::test]
    async fn role_scoped_to_other_repo_does_not_authorize() {
        let vault = MemoryVault::new();
        vault
            .create(
                CreateParams::new(RecordKind::Contributor, "ctx-other").with_tag("did", "bob"),
            )
            .await
            .unwrap();
        assert!(!is_authorized(&vault, "bob", "alice", "ctx-1").await);
    }
}
