//! Transport Server (§4.9, component C9).
//!
//! Composition root. Directly generalizes the teacher's
//! `examples/http_server.rs` `main()`/`AppState` pattern: where the
//! teacher's example hard-codes `AllowAllAuth` and skips lifecycle
//! hooks, this wires C3+C4 as the receive-pack auth gate, C5+C6 as
//! `on_push_complete`, and C7 as `on_repo_not_found` inside
//! `transport::http`, each resolving the repository's vault context-id
//! dynamically per request.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ForgeConfig;
use crate::errors::ForgeError;
use crate::identity::IdentityResolver;
use crate::repo::RepoStore;
use crate::transport::{router, GitHttpServer};
use crate::vault::VaultClient;

#[derive(Debug, Serialize)]
struct Lockfile {
    pid: u32,
    port: u16,
    started_at: String,
    version: &'static str,
}

/// Bind the HTTP listener, write the lockfile, and serve until a
/// shutdown signal arrives, at which point the lockfile is removed and
/// the function returns. `config.listen_port == 0` means OS-assigned;
/// the actually-bound port is what gets written to the lockfile.
pub async fn run<V, R>(config: ForgeConfig, vault: V, resolver: R) -> Result<(), ForgeError>
where
    V: VaultClient + 'static,
    R: IdentityResolver + 'static,
{
    tokio::fs::create_dir_all(&config.home).await?;
    tokio::fs::create_dir_all(&config.base_path).await?;

    let store = RepoStore::new(&config.base_path);
    let bundle_verify_timeout = std::time::Duration::from_secs(config.bundle_verify_timeout_secs);
    let pump_idle_timeout = std::time::Duration::from_secs(config.pump_idle_timeout_secs);
    let shutdown_grace = std::time::Duration::from_secs(config.shutdown_grace_secs);
    let state = Arc::new(GitHttpServer::new(
        store,
        vault,
        resolver,
        config.squash_threshold,
        bundle_verify_timeout,
        pump_idle_timeout,
    ));
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .map_err(ForgeError::from)?;
    let bound_port = listener
        .local_addr()
        .map_err(ForgeError::from)?
        .port();

    write_lockfile(&config.lockfile_path(), bound_port).await?;
    tracing::info!(port = bound_port, "forge daemon listening");

    let lockfile_path = config.lockfile_path();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ForgeError::from);

    // `axum::serve`'s graceful shutdown only tracks in-flight HTTP
    // connections, not the detached supervising tasks spawned per push;
    // wait for those separately, bounded (§5 "Cancellation").
    state.drain_subprocess_tasks(shutdown_grace).await;

    remove_lockfile(&lockfile_path).await;
    result
}

async fn write_lockfile(path: &PathBuf, port: u16) -> Result<(), ForgeError> {
    let lockfile = Lockfile {
        pid: std::process::id(),
        port,
        started_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let json = serde_json::to_string_pretty(&lockfile)?;
    tokio::fs::write(path, json).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o644);
        tokio::fs::set_permissions(path, permissions).await?;
    }

    Ok(())
}

async fn remove_lockfile(path: &PathBuf) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%err, "failed to remove lockfile on shutdown");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
