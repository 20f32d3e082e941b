//! Push Authentication Pipeline (§4.3, component C3).
//!
//! Invoked on every receive-pack ref discovery and POST. Deliberately
//! does **not** enforce nonce-based replay protection — git reuses the
//! same basic credentials for both the ref-discovery GET and the
//! receive-pack POST within a single push, so a single-use nonce policy
//! would reject legitimate pushes. Replay resistance is the short expiry
//! alone (see `DESIGN.md`, "Open Question decisions").

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::signature::{UnparsedPublicKey, ED25519};

use crate::errors::ForgeError;
use crate::identity::{resolver::ResolveError, token::PushTokenPayload, IdentityResolver};
use crate::vault::{QueryFilter, RecordKind, VaultClient};

use super::policy::is_authorized;

pub const RESERVED_USERNAME: &str = "did-auth";

/// Run the full pipeline: parse credentials, validate structure and
/// expiry, verify the signature, then consult the authorization policy.
/// Returns the authenticated actor id on success.
pub async fn authenticate_push<V: VaultClient, R: IdentityResolver>(
    headers: &HashMap<String, String>,
    owner: &str,
    repo: &str,
    vault: &V,
    resolver: &R,
    now: i64,
) -> Result<String, ForgeError> {
    let header = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| ForgeError::authentication("missing Authorization header"))?;

    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| ForgeError::authentication("expected Basic auth scheme"))?;

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|e| ForgeError::authentication(format!("invalid base64 credentials: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ForgeError::authentication("credentials are not valid UTF-8"))?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| ForgeError::authentication("malformed basic-auth pair"))?;
    if username != RESERVED_USERNAME {
        return Err(ForgeError::authentication(format!(
            "unexpected basic-auth username: {username}"
        )));
    }

    let (signature_b64, encoded_token) = password
        .split_once('.')
        .ok_or_else(|| ForgeError::authentication("malformed push-token password"))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| ForgeError::authentication(format!("invalid signature encoding: {e}")))?;

    let payload = PushTokenPayload::decode(encoded_token)
        .map_err(|e| ForgeError::authentication(format!("malformed push token: {e}")))?;

    // (P3) A request whose token `owner` or `repo` does not match the URL
    // is always rejected.
    if payload.owner != owner || payload.repo != repo {
        return Err(ForgeError::authentication(
            "token owner/repo does not match the request URL",
        ));
    }

    // (P2) exp <= now is always rejected, independent of signature
    // validity.
    if payload.is_expired(now) {
        return Err(ForgeError::authentication("push token has expired"));
    }

    let public_keys = resolver.resolve(&payload.did).await.map_err(|e| match e {
        ResolveError::Unknown(did) => {
            ForgeError::authentication(format!("unknown identity: {did}"))
        }
        ResolveError::Backend(msg) => ForgeError::VaultTransient(msg),
    })?;

    let signature_valid = public_keys.iter().any(|key| {
        UnparsedPublicKey::new(&ED25519, key.0)
            .verify(encoded_token.as_bytes(), &signature)
            .is_ok()
    });
    if !signature_valid {
        return Err(ForgeError::authentication(
            "signature does not verify against any resolved key",
        ));
    }

    let repo_context_id = find_repo_context_id(vault, owner, repo)
        .await
        .ok_or_else(|| ForgeError::repository_missing(owner, repo))?;

    if is_authorized(vault, &payload.did, owner, &repo_context_id).await {
        Ok(payload.did)
    } else {
        Err(ForgeError::authorization(format!(
            "{} has no role on {owner}/{repo}",
            payload.did
        )))
    }
}

/// Locate the repository record's vault context id for `(owner, name)`.
/// Repo records are parented at the owner's root context and tagged with
/// their `name`; their own record id is the context that role, ref, and
/// bundle records are parented at (see `DESIGN.md`).
pub async fn find_repo_context_id<V: VaultClient>(
    vault: &V,
    owner: &str,
    name: &str,
) -> Option<String> {
    let filter = QueryFilter::scoped_to(owner).with_tag("name", name);
    vault
        .query(RecordKind::Repo, filter, crate::vault::DateSort::Descending)
        .await
        .ok()?
        .into_iter()
        .next()
        .map(|record| record.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::resolver::memory::MemoryResolver;
    use crate::identity::{generate_push_credential, signer::Ed25519Signer};
    use crate::vault::{CreateParams, MemoryVault, RepoData, Visibility};

    async fn setup_repo(vault: &MemoryVault, owner: &str, name: &str) -> String {
        let record = vault
            .create(
                CreateParams::new(RecordKind::Repo, owner)
                    .with_tag("name", name)
                    .with_data(&RepoData {
                        name: name.to_string(),
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

    fn headers_with_basic_auth(username: &str, password: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        let token = STANDARD.encode(format!("{username}:{password}"));
        headers.insert("Authorization".to_string(), format!("Basic {token}"));
        headers
    }

    #[tokio::test]
    async fn owner_push_is_authenticated() {
        let vault = MemoryVault::new();
        let resolver = MemoryResolver::new();
        let signer = Ed25519Signer::generate().unwrap();
        resolver.register("alice", signer.public_key());
        setup_repo(&vault, "alice", "repo").await;

        let credential =
            generate_push_credential("/alice/repo", "alice", &signer, 1_000, 300).unwrap();
        let headers = headers_with_basic_auth(&credential.username, &credential.password);

        let actor = authenticate_push(&headers, "alice", "repo", &vault, &resolver, 1_001)
            .await
            .unwrap();
        assert_eq!(actor, "alice");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let vault = MemoryVault::new();
        let resolver = MemoryResolver::new();
        let signer = Ed25519Signer::generate().unwrap();
        resolver.register("alice", signer.public_key());
        setup_repo(&vault, "alice", "repo").await;

        let credential =
            generate_push_credential("/alice/repo", "alice", &signer, 1_000, 300).unwrap();
        let headers = headers_with_basic_auth(&credential.username, &credential.password);

        // now is long past exp (1000 + 300)
        let result = authenticate_push(&headers, "alice", "repo", &vault, &resolver, 5_000).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cross_binding_is_rejected() {
        let vault = MemoryVault::new();
        let resolver = MemoryResolver::new();
        let signer = Ed25519Signer::generate().unwrap();
        resolver.register("alice", signer.public_key());
        setup_repo(&vault, "alice", "repo").await;
        setup_repo(&vault, "alice", "other-repo").await;

        let credential =
            generate_push_credential("/alice/repo", "alice", &signer, 1_000, 300).unwrap();
        let headers = headers_with_basic_auth(&credential.username, &credential.password);

        // Same credentials, different URL repo name.
        let result =
            authenticate_push(&headers, "alice", "other-repo", &vault, &resolver, 1_001).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unauthorized_actor_is_rejected() {
        let vault = MemoryVault::new();
        let resolver = MemoryResolver::new();
        let owner_signer = Ed25519Signer::generate().unwrap();
        let stranger_signer = Ed25519Signer::generate().unwrap();
        resolver.register("alice", owner_signer.public_key());
        resolver.register("mallory", stranger_signer.public_key());
        setup_repo(&vault, "alice", "repo").await;

        let credential =
            generate_push_credential("/alice/repo", "mallory", &stranger_signer, 1_000, 300)
                .unwrap();
        let headers = headers_with_basic_auth(&credential.username, &credential.password);

        let result = authenticate_push(&headers, "alice", "repo", &vault, &resolver, 1_001).await;
        assert!(matches!(result, Err(ForgeError::Authorization(_))));
    }
}
