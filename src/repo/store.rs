//! Repository Store (§4.1, component C1).
//!
//! Owns a filesystem tree of bare git repositories and spawns
//! `upload-pack`/`receive-pack` subprocesses with streaming stdio,
//! grounded in the teacher's `examples/http_server.rs`
//! `FsRepository::git_cmd`/`run_git` helpers.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::errors::ForgeError;

/// Replace path-unsafe characters in an owner-id. Colons (common in
/// `did:method:id` identifiers) become the reserved separator `_`.
pub fn escape(owner_id: &str) -> String {
    owner_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

#[derive(Clone)]
pub struct RepoStore {
    base_path: PathBuf,
}

impl RepoStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Deterministic, pure: `base-path / escape(owner-id) / name.git`.
    pub fn repo_path(&self, owner_id: &str, name: &str) -> PathBuf {
        self.base_path.join(escape(owner_id)).join(format!("{name}.git"))
    }

    pub async fn exists(&self, owner_id: &str, name: &str) -> bool {
        let path = self.repo_path(owner_id, name);
        tokio::fs::metadata(path.join("HEAD")).await.is_ok()
    }

    /// Creates the directory tree and runs `git init --bare`. Idempotent
    /// iff the repository already exists with the expected layout.
    pub async fn init(&self, owner_id: &str, name: &str) -> Result<PathBuf, ForgeError> {
        let path = self.repo_path(owner_id, name);
        if self.exists(owner_id, name).await {
            return Ok(path);
        }
        tokio::fs::create_dir_all(&path).await?;
        let output = Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg(&path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ForgeError::internal(format!(
                "git init --bare failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(path)
    }

    fn git_cmd(&self, git_dir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        cmd.arg("--git-dir").arg(git_dir);
        cmd
    }

    async fn spawn_stateless(
        &self,
        owner_id: &str,
        name: &str,
        service: &str,
    ) -> Result<Child, ForgeError> {
        if !self.exists(owner_id, name).await {
            return Err(ForgeError::repository_missing(owner_id, name));
        }
        let path = self.repo_path(owner_id, name);
        self.git_cmd(&path)
            .arg(service)
            .arg("--stateless-rpc")
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ForgeError::from)
    }

    /// `git upload-pack --stateless-rpc <path>`, piped stdio.
    pub async fn upload_pack(&self, owner_id: &str, name: &str) -> Result<Child, ForgeError> {
        self.spawn_stateless(owner_id, name, "upload-pack").await
    }

    /// `git receive-pack --stateless-rpc <path>`, piped stdio.
    pub async fn receive_pack(&self, owner_id: &str, name: &str) -> Result<Child, ForgeError> {
        self.spawn_stateless(owner_id, name, "receive-pack").await
    }

    /// Runs `git {upload|receive}-pack --stateless-rpc --advertise-refs
    /// <path>`, producing the v1 smart-HTTP advertisement body (without
    /// the service-announcement prefix; callers prepend that via
    /// `transport::pktline::service_announcement`).
    pub async fn advertise_refs(
        &self,
        owner_id: &str,
        name: &str,
        service: &str,
    ) -> Result<Vec<u8>, ForgeError> {
        if !self.exists(owner_id, name).await {
            return Err(ForgeError::repository_missing(owner_id, name));
        }
        let path = self.repo_path(owner_id, name);
        let output = self
            .git_cmd(&path)
            .arg(service)
            .arg("--stateless-rpc")
            .arg("--advertise-refs")
            .arg(&path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ForgeError::internal(format!(
                "{service} --advertise-refs failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output.stdout)
    }

    /// Runs an arbitrary plumbing subcommand against the bare repo and
    /// returns its stdout, used by the ref syncer and bundle syncer (C5,
    /// C6) for `for-each-ref`, `rev-parse`, `bundle create/verify`, etc.
    pub async fn run_plumbing<I, S>(
        &self,
        owner_id: &str,
        name: &str,
        args: I,
    ) -> Result<std::process::Output, ForgeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let path = self.repo_path(owner_id, name);
        self.git_cmd(&path)
            .args(args)
            .output()
            .await
            .map_err(ForgeError::from)
    }

    /// Like `run_plumbing`, but bounded: kills the subprocess and
    /// returns `ForgeError::SubprocessHung` if it hasn't exited within
    /// `timeout` (§5 "Timeouts": bundle verification and fetch, 60s).
    pub async fn run_plumbing_timeout<I, S>(
        &self,
        owner_id: &str,
        name: &str,
        args: I,
        timeout: std::time::Duration,
    ) -> Result<std::process::Output, ForgeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let path = self.repo_path(owner_id, name);
        let mut cmd = self.git_cmd(&path);
        cmd.args(args);
        crate::subprocess::run_with_timeout(cmd, timeout).await
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
