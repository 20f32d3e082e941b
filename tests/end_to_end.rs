//! End-to-end scenarios (spec §8: Scenario A-F), exercised directly
//! against the library's components with the in-memory vault and
//! identity-resolver test doubles rather than over a live HTTP
//! listener, since the scenarios are about the authentication,
//! authorization, and sync state machine rather than wire framing
//! (pkt-line framing is covered by `transport::pktline`'s unit tests).

use forge_core::auth::{authenticate_push, find_repo_context_id};
use forge_core::identity::resolver::memory::MemoryResolver;
use forge_core::identity::{generate_push_credential, signer::Ed25519Signer};
use forge_core::repo::RepoStore;
use forge_core::sync::{sync_bundle, sync_refs, BundleLocks};
use forge_core::vault::{CreateParams, MemoryVault, QueryFilter, RecordKind, RepoData, Visibility};

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::process::Command;

async fn push_commit(store: &RepoStore, owner: &str, repo: &str, message: &str, content: &str) {
    let repo_path = store.repo_path(owner, repo);
    let work = tempfile::tempdir().unwrap();
    Command::new("git")
        .args(["clone", repo_path.to_str().unwrap(), work.path().to_str().unwrap()])
        .output()
        .await
        .unwrap();
    for (key, value) in [("user.email", "a@example.com"), ("user.name", "a")] {
        Command::new("git")
            .current_dir(work.path())
            .args(["config", key, value])
            .output()
            .await
            .unwrap();
    }
    std::fs::write(work.path().join("f.txt"), content).unwrap();
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
    let push = Command::new("git")
        .current_dir(work.path())
        .args(["push", "origin", "HEAD:refs/heads/main"])
        .output()
        .await
        .unwrap();
    assert!(push.status.success(), "{}", String::from_utf8_lossy(&push.stderr));
}

async fn register_repo(vault: &MemoryVault, owner: &str, repo: &str) -> String {
    let record = vault
        .create(
            CreateParams::new(RecordKind::Repo, owner)
                .with_tag("name", repo)
                .with_data(&RepoData {
                    name: repo.to_string(),
                    description: None,
                    default_branch: Some("main".to_string()),
                    visibility: Visibility::Public,
                })
                .unwrap(),
        )
        .await
        .unwrap();
    record.id
}

fn basic_auth_headers(username: &str, password: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let token = STANDARD.encode(format!("{username}:{password}"));
    headers.insert("Authorization".to_string(), format!("Basic {token}"));
    headers
}

/// Scenario A: first push produces one full bundle record and one ref
/// record; restoring into a fresh directory from the vault alone
/// reconstructs the repository.
#[tokio::test]
async fn scenario_a_first_push_and_restore() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RepoStore::new(tmp.path());
    let vault = MemoryVault::new();

    store.init("O", "r").await.unwrap();
    let context_id = register_repo(&vault, "O", "r").await;

    push_commit(&store, "O", "r", "initial", "v1").await;

    let synced = sync_refs(&store, &vault, "O", "r", &context_id).await.unwrap();
    assert_eq!(synced, 1);

    let locks = BundleLocks::new();
    let outcome = sync_bundle(&locks, &store, &vault, "O", "r", &context_id, Visibility::Public, 20, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.created_bundle);

    let bundle_records = vault
        .query(
            RecordKind::Bundle,
            QueryFilter::scoped_to(&context_id),
            forge_core::vault::DateSort::Ascending,
        )
        .await
        .unwrap();
    assert_eq!(bundle_records.len(), 1);
    assert_eq!(bundle_records[0].tag("is_full"), Some("true"));

    let restored_path = tempfile::tempdir().unwrap().path().join("restored.git");
    let restore_outcome = forge_core::sync::restore(&vault, &restored_path, &context_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(restore_outcome.success);

    let show_ref = Command::new("git")
        .arg("--git-dir")
        .arg(&restored_path)
        .args(["show-ref", "refs/heads/main"])
        .output()
        .await
        .unwrap();
    assert!(show_ref.status.success());
}

/// Scenario B: a second identity with no role on the repository is
/// rejected by the authentication pipeline before any objects transfer.
#[tokio::test]
async fn scenario_b_unauthorized_push_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RepoStore::new(tmp.path());
    let vault = MemoryVault::new();
    let resolver = MemoryResolver::new();

    store.init("O", "r").await.unwrap();
    register_repo(&vault, "O", "r").await;

    let owner_signer = Ed25519Signer::generate().unwrap();
    let stranger_signer = Ed25519Signer::generate().unwrap();
    resolver.register("O", owner_signer.public_key());
    resolver.register("U", stranger_signer.public_key());

    let now = 1_000;
    let credential = generate_push_credential("/O/r", "U", &stranger_signer, now, 300).unwrap();
    let headers = basic_auth_headers(&credential.username, &credential.password);

    let result = authenticate_push(&headers, "O", "r", &vault, &resolver, now + 1).await;
    assert!(result.is_err());
}

/// Scenario C: credentials scoped to `(O, r)` are rejected against the
/// URL `(O, other-repo)` because the token's `repo` field does not
/// match.
#[tokio::test]
async fn scenario_c_cross_binding_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RepoStore::new(tmp.path());
    let vault = MemoryVault::new();
    let resolver = MemoryResolver::new();

    store.init("O", "r").await.unwrap();
    store.init("O", "other-repo").await.unwrap();
    register_repo(&vault, "O", "r").await;
    register_repo(&vault, "O", "other-repo").await;

    let signer = Ed25519Signer::generate().unwrap();
    resolver.register("O", signer.public_key());

    let now = 1_000;
    let credential = generate_push_credential("/O/r", "O", &signer, now, 300).unwrap();
    let headers = basic_auth_headers(&credential.username, &credential.password);

    let result = authenticate_push(&headers, "O", "other-repo", &vault, &resolver, now + 1).await;
    assert!(result.is_err());
}

/// Scenario D: with `squash-threshold = 2`, three pushes in sequence
/// leave exactly one full bundle record once the squash settles.
#[tokio::test]
async fn scenario_d_squash() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RepoStore::new(tmp.path());
    let vault = MemoryVault::new();
    let locks = BundleLocks::new();

    store.init("O", "r").await.unwrap();
    let context_id = register_repo(&vault, "O", "r").await;

    for (i, message) in ["c1", "c2", "c3"].iter().enumerate() {
        push_commit(&store, "O", "r", message, &i.to_string()).await;
        sync_bundle(&locks, &store, &vault, "O", "r", &context_id, Visibility::Public, 2, Duration::from_secs(5))
            .await
            .unwrap();
    }

    let bundle_records = vault
        .query(
            RecordKind::Bundle,
            QueryFilter::scoped_to(&context_id),
            forge_core::vault::DateSort::Ascending,
        )
        .await
        .unwrap();
    assert_eq!(bundle_records.len(), 1);
    assert_eq!(bundle_records[0].tag("is_full"), Some("true"));
}

/// Scenario E: two repositories under the same owner stay isolated —
/// each repository's bundle chain only ever references its own tip.
#[tokio::test]
async fn scenario_e_multi_repo_isolation() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RepoStore::new(tmp.path());
    let vault = MemoryVault::new();
    let locks = BundleLocks::new();

    store.init("O", "a").await.unwrap();
    store.init("O", "b").await.unwrap();
    let ctx_a = register_repo(&vault, "O", "a").await;
    let ctx_b = register_repo(&vault, "O", "b").await;

    push_commit(&store, "O", "a", "alpha", "alpha").await;
    push_commit(&store, "O", "b", "beta", "beta").await;

    sync_bundle(&locks, &store, &vault, "O", "a", &ctx_a, Visibility::Public, 20, Duration::from_secs(5))
        .await
        .unwrap();
    sync_bundle(&locks, &store, &vault, "O", "b", &ctx_b, Visibility::Public, 20, Duration::from_secs(5))
        .await
        .unwrap();

    let records_a = vault
        .query(RecordKind::Bundle, QueryFilter::scoped_to(&ctx_a), forge_core::vault::DateSort::Ascending)
        .await
        .unwrap();
    let records_b = vault
        .query(RecordKind::Bundle, QueryFilter::scoped_to(&ctx_b), forge_core::vault::DateSort::Ascending)
        .await
        .unwrap();

    assert_eq!(records_a.len(), 1);
    assert_eq!(records_b.len(), 1);
    assert_ne!(
        records_a[0].tag("tip_commit"),
        records_b[0].tag("tip_commit")
    );
}

/// Scenario F: a token with `exp = now - 1` is rejected outright.
#[tokio::test]
async fn scenario_f_expired_token_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RepoStore::new(tmp.path());
    let vault = MemoryVault::new();
    let resolver = MemoryResolver::new();

    store.init("O", "r").await.unwrap();
    register_repo(&vault, "O", "r").await;

    let signer = Ed25519Signer::generate().unwrap();
    resolver.register("O", signer.public_key());

    let now = 1_000;
    // exp = now - 1, generated by setting ttl negative relative to `now`.
    let credential = generate_push_credential("/O/r", "O", &signer, now - 10, 1).unwrap();
    let headers = basic_auth_headers(&credential.username, &credential.password);

    let result = authenticate_push(&headers, "O", "r", &vault, &resolver, now).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn find_repo_context_id_round_trips() {
    let vault = MemoryVault::new();
    let context_id = register_repo(&vault, "O", "r").await;
    let found = find_repo_context_id(&vault, "O", "r").await.unwrap();
    assert_eq!(found, context_id);
    assert!(find_repo_context_id(&vault, "O", "missing").await.is_none());
}
