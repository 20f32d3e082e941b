//! Smart-HTTP Handler (§4.2, component C2).
//!
//! Grounded in the teacher's `protocol::http::HttpGitHandler` for the
//! route/content-type table, and in `examples/http_server.rs` for the
//! `axum::Router` wiring and the `Body`-to-subprocess-stdio streaming
//! pattern. Generalizes the teacher's single-`Bytes`-body `upload_pack`
//! handler into a true full-duplex pump, since stateless-rpc
//! `receive-pack` requires concurrently writing the POST body to the
//! child's stdin while draining its stdout (§5).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;

use crate::auth;
use crate::errors::ForgeError;
use crate::identity::IdentityResolver;
use crate::repo::RepoStore;
use crate::sync::{self, BundleLocks};
use crate::vault::{RecordKind, Visibility, VaultClient};

pub struct GitHttpServer<V: VaultClient, R: IdentityResolver> {
    pub store: RepoStore,
    pub vault: V,
    pub resolver: R,
    pub locks: BundleLocks,
    pub squash_threshold: u32,
    /// §5 "Timeouts": bundle verification and fetch, threaded into C6/C7.
    pub bundle_verify_timeout: Duration,
    /// §7 "subprocess-hung": deadline for a stalled stdin/stdout pump.
    pub pump_idle_timeout: Duration,
    /// Supervising tasks for in-flight upload-pack/receive-pack
    /// subprocesses, tracked so shutdown can wait on them up to a
    /// bounded grace period (§5 "Cancellation") instead of abandoning
    /// them the instant `axum::serve` returns.
    subprocess_tasks: AsyncMutex<JoinSet<()>>,
}

impl<V: VaultClient + 'static, R: IdentityResolver + 'static> GitHttpServer<V, R> {
    pub fn new(
        store: RepoStore,
        vault: V,
        resolver: R,
        squash_threshold: u32,
        bundle_verify_timeout: Duration,
        pump_idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            vault,
            resolver,
            locks: BundleLocks::new(),
            squash_threshold,
            bundle_verify_timeout,
            pump_idle_timeout,
            subprocess_tasks: AsyncMutex::new(JoinSet::new()),
        }
    }

    /// Waits up to `grace_period` for outstanding subprocess supervisor
    /// tasks (pump + wait + post-push callback) to finish on their own,
    /// then aborts whatever is left (§5 "Cancellation": "the server
    /// waits up to a bounded grace period before killing outstanding
    /// tasks").
    pub async fn drain_subprocess_tasks(&self, grace_period: Duration) {
        let mut tasks = self.subprocess_tasks.lock().await;
        let drain_all = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace_period, drain_all).await.is_err() {
            tracing::warn!(
                ?grace_period,
                "shutdown grace period elapsed with subprocess tasks still outstanding; aborting"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

pub fn router<V, R>(state: Arc<GitHttpServer<V, R>>) -> Router
where
    V: VaultClient + 'static,
    R: IdentityResolver + 'static,
{
    Router::new()
        .route("/{owner}/{repo}/info/refs", get(info_refs))
        .route("/{owner}/{repo}/git-upload-pack", post(upload_pack))
        .route("/{owner}/{repo}/git-receive-pack", post(receive_pack))
        .route("/health", get(health))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}

async fn health() -> Response {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"}))).into_response()
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn error_response(err: ForgeError) -> Response {
    match err {
        ForgeError::Authentication(_) | ForgeError::Authorization(_) => {
            (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
        }
        ForgeError::Protocol(_) => (StatusCode::FORBIDDEN, err.to_string()).into_response(),
        ForgeError::RepositoryMissing(_, _) => {
            (StatusCode::NOT_FOUND, err.to_string()).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Gate for receive-pack ref discovery and POST (§4.2 "authenticate-push
/// lifecycle hook" composed from C3+C4).
async fn authorize_receive_pack<V: VaultClient, R: IdentityResolver>(
    state: &GitHttpServer<V, R>,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
) -> Result<(), ForgeError> {
    let map = headers_to_map(headers);
    auth::authenticate_push(&map, owner, repo, &state.vault, &state.resolver, now())
        .await
        .map(|_| ())
}

/// Ensures `(owner, repo)` exists on disk, attempting a bundle restore
/// (C7) once if it does not (§4.2 "on-repo-not-found" lifecycle hook).
async fn ensure_repo_present<V: VaultClient, R: IdentityResolver>(
    state: &GitHttpServer<V, R>,
    owner: &str,
    repo: &str,
) -> bool {
    if state.store.exists(owner, repo).await {
        return true;
    }

    let Some(context_id) = auth::find_repo_context_id(&state.vault, owner, repo).await else {
        return false;
    };

    let target_path = state.store.repo_path(owner, repo);
    match sync::restore(&state.vault, &target_path, &context_id, state.bundle_verify_timeout).await {
        Ok(outcome) if outcome.success => true,
        Ok(_) => false,
        Err(err) => {
            tracing::warn!(%err, owner, repo, "bundle restore attempt failed");
            false
        }
    }
}

async fn info_refs<V: VaultClient, R: IdentityResolver>(
    State(state): State<Arc<GitHttpServer<V, R>>>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(service) = params.get("service") else {
        return error_response(ForgeError::protocol("missing service parameter"));
    };
    if service != "git-upload-pack" && service != "git-receive-pack" {
        return error_response(ForgeError::protocol(format!("unsupported service: {service}")));
    }

    if service == "git-receive-pack" {
        if let Err(err) = authorize_receive_pack(&state, &headers, &owner, &repo).await {
            return error_response(err);
        }
    }

    if !ensure_repo_present(&state, &owner, &repo).await {
        return error_response(ForgeError::repository_missing(&owner, &repo));
    }

    match state.store.advertise_refs(&owner, &repo, service).await {
        Ok(body) => {
            let mut response = Vec::with_capacity(body.len() + 32);
            response.extend_from_slice(&crate::transport::pktline::service_announcement(service));
            response.extend_from_slice(&body);
            let content_type = advertisement_content_type(service);
            (
                StatusCode::OK,
                [
                    (axum::http::header::CONTENT_TYPE, content_type),
                    (axum::http::header::CACHE_CONTROL, "no-cache"),
                ],
                response,
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

fn advertisement_content_type(service: &str) -> &'static str {
    match service {
        "git-receive-pack" => "application/x-git-receive-pack-advertisement",
        _ => "application/x-git-upload-pack-advertisement",
    }
}

async fn upload_pack<V: VaultClient + 'static, R: IdentityResolver + 'static>(
    State(state): State<Arc<GitHttpServer<V, R>>>,
    Path((owner, repo)): Path<(String, String)>,
    body: Body,
) -> Response {
    if !ensure_repo_present(&state, &owner, &repo).await {
        return error_response(ForgeError::repository_missing(&owner, &repo));
    }

    let mut child = match state.store.upload_pack(&owner, &repo).await {
        Ok(child) => child,
        Err(err) => return error_response(err),
    };
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");

    let pump = tokio::spawn(pump_body_into_stdin(body, stdin, state.pump_idle_timeout));
    let (disconnect_tx, disconnect_rx) = watch::channel(false);
    let stream = DisconnectGuard {
        inner: ReaderStream::new(stdout).map(|r| r.map_err(axum::Error::new)),
        notify: disconnect_tx,
        finished: false,
    };

    let owner_owned = owner.clone();
    let repo_owned = repo.clone();
    state.subprocess_tasks.lock().await.spawn(supervise_subprocess(
        state.clone(),
        owner_owned,
        repo_owned,
        child,
        pump,
        disconnect_rx,
        false,
    ));

    (
        StatusCode::OK,
        [
            (
                axum::http::header::CONTENT_TYPE,
                "application/x-git-upload-pack-result",
            ),
            (axum::http::header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn receive_pack<V: VaultClient + 'static, R: IdentityResolver + 'static>(
    State(state): State<Arc<GitHttpServer<V, R>>>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Err(err) = authorize_receive_pack(&state, &headers, &owner, &repo).await {
        return error_response(err);
    }
    if !ensure_repo_present(&state, &owner, &repo).await {
        return error_response(ForgeError::repository_missing(&owner, &repo));
    }

    let mut child = match state.store.receive_pack(&owner, &repo).await {
        Ok(child) => child,
        Err(err) => return error_response(err),
    };
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");

    let pump = tokio::spawn(pump_body_into_stdin(body, stdin, state.pump_idle_timeout));
    let (disconnect_tx, disconnect_rx) = watch::channel(false);
    let stream = DisconnectGuard {
        inner: ReaderStream::new(stdout).map(|r| r.map_err(axum::Error::new)),
        notify: disconnect_tx,
        finished: false,
    };

    let owner_owned = owner.clone();
    let repo_owned = repo.clone();
    state.subprocess_tasks.lock().await.spawn(supervise_subprocess(
        state.clone(),
        owner_owned,
        repo_owned,
        child,
        pump,
        disconnect_rx,
        true,
    ));

    (
        StatusCode::OK,
        [
            (
                axum::http::header::CONTENT_TYPE,
                "application/x-git-receive-pack-result",
            ),
            (axum::http::header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Pumps the request body into the subprocess's stdin, one chunk at a
/// time. Each read from the body and each write to stdin is bounded by
/// `idle_timeout`; either stalling (a client that stops sending, or a
/// subprocess that stops draining its stdin) produces
/// `ForgeError::SubprocessHung` rather than blocking forever (§5
/// Suspension points, §7 "subprocess-hung").
async fn pump_body_into_stdin(
    body: Body,
    mut stdin: tokio::process::ChildStdin,
    idle_timeout: Duration,
) -> Result<(), ForgeError> {
    let mut stream = body.into_data_stream();
    loop {
        let chunk = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(err))) => {
                tracing::warn!(%err, "error reading request body while pumping to subprocess stdin");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                return Err(ForgeError::SubprocessHung(format!(
                    "no request-body progress within {idle_timeout:?}"
                )));
            }
        };
        if tokio::time::timeout(idle_timeout, stdin.write_all(&chunk)).await.is_err() {
            return Err(ForgeError::SubprocessHung(format!(
                "subprocess stdin write stalled past {idle_timeout:?}"
            )));
        }
    }
    let _ = stdin.shutdown().await;
    Ok(())
}

/// Wraps a response-body stream so that, if it is dropped before
/// yielding `None` (the client disconnected mid-transfer rather than
/// the stream completing normally), `notify` is flipped to `true`. A
/// stream that finishes normally drops `notify` without ever sending,
/// which `wait_for_disconnect` treats as "no event" rather than as a
/// disconnect.
struct DisconnectGuard<S> {
    inner: S,
    notify: watch::Sender<bool>,
    finished: bool,
}

impl<S: Stream + Unpin> Stream for DisconnectGuard<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            this.finished = true;
        }
        poll
    }
}

impl<S> Drop for DisconnectGuard<S> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.notify.send(true);
        }
    }
}

/// Resolves once a `DisconnectGuard` signals a disconnect. If the
/// guard instead finished normally, its sender is dropped without ever
/// sending `true`; in that case this future parks forever rather than
/// resolving, so it never wins a `select!` race against the
/// subprocess's own exit.
async fn wait_for_disconnect(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
fn terminate_child(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is this child's own process id, read from
        // `Child::id()` while we still own the child; sending it
        // SIGTERM matches `libc::kill`'s documented signal semantics.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

/// Supervises one upload-pack/receive-pack subprocess to completion:
/// on client disconnect, sends SIGTERM and skips the post-push
/// callback entirely (§5 "Cancellation"); on a hung stdio pump, kills
/// the subprocess and logs (§7 "subprocess-hung"); on a clean
/// `receive-pack` exit, fires `on_push_complete`.
#[allow(clippy::too_many_arguments)]
async fn supervise_subprocess<V, R>(
    state: Arc<GitHttpServer<V, R>>,
    owner: String,
    repo: String,
    mut child: tokio::process::Child,
    pump: tokio::task::JoinHandle<Result<(), ForgeError>>,
    disconnect_rx: watch::Receiver<bool>,
    fire_post_push: bool,
) where
    V: VaultClient + 'static,
    R: IdentityResolver + 'static,
{
    tokio::select! {
        _ = wait_for_disconnect(disconnect_rx) => {
            tracing::warn!(owner, repo, "client disconnected mid-transfer; sending SIGTERM to subprocess");
            terminate_child(&mut child);
            let _ = child.wait().await;
            pump.abort();
        }
        wait_result = child.wait() => {
            let pump_result = pump.await;
            match (pump_result, wait_result) {
                (Ok(Err(hung)), _) => {
                    tracing::error!(%hung, owner, repo, "stdio pump hung; subprocess killed, push not acknowledged");
                    let _ = child.start_kill();
                }
                (_, Ok(status)) if status.success() && fire_post_push => {
                    on_push_complete(state, owner, repo).await;
                }
                (_, Ok(status)) if status.success() => {
                    tracing::debug!(owner, repo, "upload-pack completed");
                }
                (_, Ok(status)) => {
                    tracing::debug!(owner, repo, code = status.code(), "subprocess exited non-zero; skipping post-push sync");
                }
                (_, Err(err)) => {
                    tracing::warn!(%err, owner, repo, "failed to wait on subprocess");
                }
            }
        }
    }
}

/// Fans out to the ref syncer (C5) and bundle syncer (C6), both
/// resolved **per push** against the vault (§4.9: "multi-repo support
/// requires dynamic context resolution; static wiring is a bug").
/// Errors are logged and absorbed per the post-push-callback
/// disposition (§7) — the git client has already seen a successful
/// push.
async fn on_push_complete<V: VaultClient + 'static, R: IdentityResolver + 'static>(
    state: Arc<GitHttpServer<V, R>>,
    owner: String,
    repo: String,
) {
    let Some(context_id) = auth::find_repo_context_id(&state.vault, &owner, &repo).await else {
        tracing::warn!(owner, repo, "post-push sync skipped: no repo record in vault");
        return;
    };

    let repo_record = match state
        .vault
        .query(
            RecordKind::Repo,
            crate::vault::QueryFilter::scoped_to(&owner).with_tag("name", repo.as_str()),
            crate::vault::DateSort::Descending,
        )
        .await
    {
        Ok(records) => records.into_iter().next(),
        Err(err) => {
            tracing::warn!(%err, owner, repo, "post-push sync: failed to read repo record");
            None
        }
    };
    let visibility = repo_record
        .as_ref()
        .and_then(|r| r.json::<crate::vault::RepoData>().ok())
        .map(|d| d.visibility)
        .unwrap_or(Visibility::Public);

    match sync::sync_refs(&state.store, &state.vault, &owner, &repo, &context_id).await {
        Ok(count) => tracing::debug!(owner, repo, count, "ref sync completed"),
        Err(err) => tracing::warn!(%err, owner, repo, "ref sync failed after push"),
    }

    match sync::sync_bundle(
        &state.locks,
        &state.store,
        &state.vault,
        &owner,
        &repo,
        &context_id,
        visibility,
        state.squash_threshold,
        state.bundle_verify_timeout,
    )
    .await
    {
        Ok(Some(outcome)) => {
            tracing::debug!(owner, repo, squashed = outcome.squashed, "bundle sync completed")
        }
        Ok(None) => tracing::debug!(owner, repo, "bundle sync: no-op"),
        Err(err) => tracing::warn!(%err, owner, repo, "bundle sync failed after push"),
    }
}
