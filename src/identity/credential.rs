//! Push-Credential Generator (§4.8, component C8). Client-side: produces
//! the basic-auth password carrying a freshly signed push token.

use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use super::signer::Signer;
use super::token::{PushTokenPayload, TokenError};

pub const RESERVED_USERNAME: &str = "did-auth";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("could not extract owner/repo from url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("random nonce generation failed")]
    Rng,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCredential {
    pub username: String,
    pub password: String,
}

/// Extract `(owner_id, name)` from a repository URL or path of the form
/// `[scheme://host[:port]]/<owner-id>/<name>[.git]`.
pub fn parse_repo_url(url_or_path: &str) -> Result<(String, String), CredentialError> {
    let without_scheme = url_or_path
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url_or_path);
    // Drop a leading "host[:port]" component if this looked like a full URL.
    let path = if url_or_path.contains("://") {
        without_scheme.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else {
        without_scheme.trim_start_matches('/')
    };

    let path = path.trim_end_matches('/');
    let mut parts = path.splitn(2, '/');
    let owner = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CredentialError::InvalidUrl(url_or_path.to_string()))?;
    let name = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CredentialError::InvalidUrl(url_or_path.to_string()))?;
    let name = name.strip_suffix(".git").unwrap_or(name);

    Ok((owner.to_string(), name.to_string()))
}

fn random_nonce() -> Result<String, CredentialError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes).map_err(|_| CredentialError::Rng)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Build the basic-auth `{username, password}` pair for a push to
/// `repo_url`, signed by `actor_id`'s `signing_key`.
pub fn generate_push_credential(
    repo_url: &str,
    actor_id: &str,
    signing_key: &dyn Signer,
    now: i64,
    ttl_secs: i64,
) -> Result<PushCredential, CredentialError> {
    let (owner, repo) = parse_repo_url(repo_url)?;

    let payload = PushTokenPayload {
        did: actor_id.to_string(),
        owner,
        repo,
        exp: now + ttl_secs,
        nonce: random_nonce()?,
    };

    let encoded_token = payload.encode()?;
    let signature = signing_key.sign(encoded_token.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature.0);

    Ok(PushCredential {
        username: RESERVED_USERNAME.to_string(),
        password: format!("{signature_b64}.{encoded_token}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::signer::Ed25519Signer;

    #[test]
    fn parses_plain_path() {
        let (owner, repo) = parse_repo_url("/did:key:alice/my-repo").unwrap();
        assert_eq!(owner, "did:key:alice");
        assert_eq!(repo, "my-repo");
    }

    #[test]
    fn parses_full_url_and_strips_dot_git() {
        let (owner, repo) =
            parse_repo_url("http://localhost:9000/did:key:alice/my-repo.git").unwrap();
        assert_eq!(owner, "did:key:alice");
        assert_eq!(repo, "my-repo");
    }

    #[test]
    fn rejects_url_missing_repo_name() {
        assert!(parse_repo_url("http://localhost/owner-only").is_err());
    }

    #[test]
    fn credential_has_reserved_username_and_dot_separated_password() {
        let signer = Ed25519Signer::generate().unwrap();
        let credential =
            generate_push_credential("/alice/repo", "alice", &signer, 1_000, 300).unwrap();
        assert_eq!(credential.username, RESERVED_USERNAME);
        assert_eq!(credential.password.matches('.').count(), 1);
    }
}
