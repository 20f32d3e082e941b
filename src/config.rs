//! Daemon configuration.
//!
//! Mirrors the teacher's `PackConfig`/`LfsConfig` shape: a plain
//! `serde`-deserializable struct with a `Default` impl and a tolerant
//! deserializer for fields that are commonly hand-edited as either a
//! number or a string.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ForgeError;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ForgeConfig {
    /// Root of the filesystem tree of bare repositories (§3: physical
    /// repository path is `base_path / escape(owner_id) / name.git`).
    pub base_path: PathBuf,
    /// Daemon home directory: holds `daemon.lock` and `daemon.log`.
    pub home: PathBuf,
    /// Port to bind the HTTP listener on; 0 means OS-assigned.
    pub listen_port: u16,
    /// Number of incremental bundles after which a squash is triggered.
    #[serde(deserialize_with = "u32_or_string")]
    pub squash_threshold: u32,
    /// Recommended push-token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Deadline for `git bundle verify` / `git fetch` during restore,
    /// and for every other bundle-sync subprocess call (create, verify,
    /// list-heads) guarded by the same per-repo lock (§5 "Timeouts").
    pub bundle_verify_timeout_secs: u64,
    /// Deadline for the `/health` probe.
    pub health_timeout_secs: u64,
    /// Deadline for a single step of the smart-HTTP stdin/stdout pump
    /// (§5 Suspension points, §7 "subprocess-hung"): no request-body
    /// chunk read, and no stdin write, may stall longer than this
    /// before the subprocess is killed. `spec.md` names the error
    /// disposition but gives no numeric deadline for this specific
    /// suspension point (unlike the 60s bundle-verify/fetch figure);
    /// chosen generously relative to that figure so that a merely slow
    /// client isn't penalized for the same limit that bounds local
    /// subprocess calls.
    pub pump_idle_timeout_secs: u64,
    /// Bounded grace period the server waits for in-flight post-push
    /// callbacks and subprocess supervisors to finish before aborting
    /// them at shutdown (§5 "Cancellation": "waits up to a bounded
    /// grace period before killing outstanding tasks" — no numeric
    /// value given in `spec.md`).
    pub shutdown_grace_secs: u64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./repos"),
            home: PathBuf::from("./forge-home"),
            listen_port: 0,
            squash_threshold: 20,
            token_ttl_secs: 300,
            bundle_verify_timeout_secs: 60,
            health_timeout_secs: 2,
            pump_idle_timeout_secs: 120,
            shutdown_grace_secs: 30,
        }
    }
}

impl ForgeConfig {
    /// Load configuration from an optional JSON file, then apply
    /// `FORGE_*` environment overrides on top.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ForgeError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let data = std::fs::read_to_string(path)?;
                serde_json::from_str(&data)?
            }
            _ => Self::default(),
        };

        if let Ok(base_path) = std::env::var("FORGE_BASE_PATH") {
            config.base_path = PathBuf::from(base_path);
        }
        if let Ok(home) = std::env::var("FORGE_HOME") {
            config.home = PathBuf::from(home);
        }
        if let Ok(port) = std::env::var("FORGE_LISTEN_PORT") {
            config.listen_port = port
                .parse()
                .map_err(|_| ForgeError::internal("FORGE_LISTEN_PORT must be a u16"))?;
        }
        if let Ok(threshold) = std::env::var("FORGE_SQUASH_THRESHOLD") {
            config.squash_threshold = threshold
                .parse()
                .map_err(|_| ForgeError::internal("FORGE_SQUASH_THRESHOLD must be a u32"))?;
        }

        Ok(config)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.home.join("daemon.lock")
    }

    pub fn log_path(&self) -> PathBuf {
        self.home.join("daemon.log")
    }
}

fn u32_or_string<'deserialize, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'deserialize>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum U32OrString {
        U32(u32),
        String(String),
    }

    match U32OrString::deserialize(deserializer)? {
        U32OrString::U32(v) => Ok(v),
        U32OrString::String(v) => v.parse().map_err(serde::de::Error::custom),
    }
}
