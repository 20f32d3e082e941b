//! Deadline-bounded subprocess execution (§5 "Timeouts", §7
//! "subprocess-hung").
//!
//! `tokio::process::Command::output()` has no timeout of its own — a
//! wedged `git` child blocks its caller forever. This wraps spawn +
//! wait in `tokio::time::timeout`, relying on `kill_on_drop` to reap
//! the child when the timeout future is dropped on expiry.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::errors::ForgeError;

/// Spawns `cmd` with piped stdio and waits up to `timeout` for it to
/// exit. On expiry the child is killed (via `kill_on_drop`, triggered
/// when the timed-out future drops its still-running `Child`) and
/// `ForgeError::SubprocessHung` is returned.
pub async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Output, ForgeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(ForgeError::from)?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(ForgeError::from),
        Err(_) => Err(ForgeError::SubprocessHung(format!(
            "subprocess made no progress within {timeout:?}"
        ))),
    }
}
