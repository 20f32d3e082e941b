//! `forge-credential-helper` — a git credential helper implementing the
//! `get` operation of git's credential helper protocol (§4.8,
//! component C8, client side).
//!
//! Configured via `.git/config`:
//! ```text
//! [credential "http://localhost"]
//!     helper = forge-credential-helper
//! ```
//! git invokes `forge-credential-helper get`, writes a `key=value`
//! block terminated by a blank line to its stdin (at minimum a `url=`
//! line), and reads a `username=`/`password=` block back from stdout.

use std::io::{self, BufRead, Write};

use forge_core::identity::{generate_push_credential, signer::Ed25519Signer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let operation = args.next().unwrap_or_default();
    if operation != "get" {
        // `store` and `erase` are no-ops: this helper never caches.
        return Ok(());
    }

    let mut url = None;
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("url=") {
            url = Some(value.to_string());
        }
    }
    let url = url.ok_or("missing url= line on stdin")?;

    let actor_id = std::env::var("FORGE_ACTOR_ID")
        .map_err(|_| "FORGE_ACTOR_ID must name the pushing identity")?;
    let signing_key_path = std::env::var("FORGE_SIGNING_KEY")
        .map_err(|_| "FORGE_SIGNING_KEY must point to a PKCS#8 Ed25519 key file")?;
    let ttl_secs: i64 = std::env::var("FORGE_TOKEN_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(300);

    let pkcs8 = std::fs::read(signing_key_path)?;
    let signer = Ed25519Signer::from_pkcs8(&pkcs8)?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64;

    let credential = generate_push_credential(&url, &actor_id, &signer, now, ttl_secs)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "username={}", credential.username)?;
    writeln!(out, "password={}", credential.password)?;
    Ok(())
}
