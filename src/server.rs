//! HTTP and WebSocket server.
//!
//! Exposes the watched file list, the group registry, and content generation
//! over a JSON HTTP API, plus a live channel that pushes file-list updates to
//! every connected observer.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/files` | Current filtered file list |
//! | `GET`  | `/api/config` | Sanitized configuration subset |
//! | `POST` | `/api/generate` | Generate a content artifact for a group |
//! | `GET`  | `/api/groups` | List all groups |
//! | `POST` | `/api/groups` | Replace the whole group registry |
//! | `PUT`  | `/api/groups/{id}` | Update one group (renames its directory on id change) |
//! | `DELETE` | `/api/groups/{id}` | Delete a group and its directory |
//! | `POST` | `/api/groups/{groupId}/history` | Append a generation record |
//! | `GET`  | `/ws` | Live observer channel (WebSocket) |
//!
//! Generated artifacts are also served statically under the output
//! directory's path (`/.llmix/...` by default).
//!
//! # Error Contract
//!
//! Error responses are JSON bodies of the shape:
//!
//! ```json
//! { "error": "Group not found", "details": "..." }
//! ```
//!
//! Validation failures map to 400, unknown group ids to 404, storage and
//! generation failures to 500. The live channel never carries error objects.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so any local UI can talk
//! to the server.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::config::{Config, OutputConfig};
use crate::generate::{generate_content_file, GenerateSpec, GenerationResult};
use crate::groups::{is_valid_slug, Group, GroupStore};
use crate::hub::{Outbound, ServerMessage, SyncHub};
use crate::ignore::IgnoreMatcher;
use crate::scanner;
use crate::watcher::{FileWatcher, WatchUpdate};

/// Interval between liveness probes on each observer connection.
const PING_INTERVAL: Duration = Duration::from_secs(3);

/// Hard ceiling on waiting for connections to close during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<GroupStore>,
    hub: Arc<SyncHub>,
    watch_dir: Arc<PathBuf>,
    matcher: IgnoreMatcher,
}

impl AppState {
    /// Build the state and initialize the group store (seeding the default
    /// group on first run).
    pub async fn new(config: Config, watch_dir: &Path) -> anyhow::Result<Self> {
        let matcher = IgnoreMatcher::new(&config.ignore);
        let store = GroupStore::new(watch_dir, &config);
        store.init().await?;

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            hub: Arc::new(SyncHub::new()),
            watch_dir: Arc::new(watch_dir.to_path_buf()),
            matcher,
        })
    }

    pub fn hub(&self) -> Arc<SyncHub> {
        self.hub.clone()
    }

    pub fn matcher(&self) -> IgnoreMatcher {
        self.matcher.clone()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let artifacts_dir = state.watch_dir.join(&state.config.output.directory);
    let artifacts_route = format!("/{}", state.config.output.directory);

    Router::new()
        .route("/api/files", get(handle_get_files))
        .route("/api/config", get(handle_get_config))
        .route("/api/generate", post(handle_generate))
        .route("/api/groups", get(handle_get_groups).post(handle_save_groups))
        .route(
            "/api/groups/{id}",
            put(handle_update_group).delete(handle_delete_group),
        )
        .route("/api/groups/{id}/history", post(handle_add_history))
        .route("/ws", get(handle_ws_upgrade))
        .nest_service(&artifacts_route, ServeDir::new(artifacts_dir))
        .layer(cors)
        .with_state(state)
}

/// Start the server, the watcher, and the broadcast pump; runs until SIGINT.
///
/// Shutdown asks every live connection to close, then waits at most
/// [`SHUTDOWN_GRACE`] for the drain before proceeding regardless, so a
/// misbehaving peer cannot hang the process.
pub async fn run_server(config: Config, watch_dir: &Path) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config, watch_dir).await?;

    let mut watcher = FileWatcher::start(watch_dir.to_path_buf(), state.matcher())?;
    let pump = tokio::spawn(pump_updates(watcher.subscribe(), state.hub()));

    let hub = state.hub();
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;
    info!("llmix server listening on http://{}", bind_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let graceful_hub = hub.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = graceful_rx.wait_for(|fired| *fired).await;
        info!("Shutting down llmix...");
        graceful_hub.shutdown().await;
    });

    let mut ceiling_rx = shutdown_rx.clone();
    tokio::select! {
        result = async { server.await } => result?,
        _ = async {
            let _ = ceiling_rx.wait_for(|fired| *fired).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!("Connections still open after {:?}; closing anyway", SHUTDOWN_GRACE);
        }
    }

    pump.abort();
    watcher.close().await;
    Ok(())
}

/// Forward watcher emissions to the hub verbatim.
///
/// The hub recomputes nothing — the event's file list is what every live
/// connection receives.
pub async fn pump_updates(mut updates: broadcast::Receiver<WatchUpdate>, hub: Arc<SyncHub>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                hub.broadcast(ServerMessage::file_update(
                    update.event,
                    update.path,
                    update.files,
                ))
                .await;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Broadcast pump lagged, skipped {} updates", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ============ Error response ============

/// JSON error body: a message plus optional detail.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
        details: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
        details: None,
    }
}

fn internal_error(message: impl Into<String>, details: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
        details: Some(details.into()),
    }
}

/// Map library errors onto the most appropriate status code, so store and
/// generator code can stay on plain `anyhow` errors.
fn classify_error(fallback: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);

    if msg.contains("not found") || msg.contains("Not found") {
        not_found(msg)
    } else if msg.contains("required") {
        bad_request(msg)
    } else {
        internal_error(fallback, msg)
    }
}

// ============ Files & config ============

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<String>,
}

/// Fresh scan of the watched tree (runs on the blocking pool — walkdir is
/// synchronous).
async fn scan_files(state: &AppState) -> anyhow::Result<Vec<String>> {
    let root = state.watch_dir.as_ref().clone();
    let matcher = state.matcher.clone();
    tokio::task::spawn_blocking(move || scanner::scan(&root, &matcher)).await?
}

async fn handle_get_files(State(state): State<AppState>) -> Result<Json<FilesResponse>, AppError> {
    let files = scan_files(&state)
        .await
        .map_err(|e| internal_error("Failed to retrieve files", format!("{:#}", e)))?;
    Ok(Json(FilesResponse { files }))
}

/// Client-facing configuration subset. Server internals (bind address) are
/// not exposed.
#[derive(Serialize)]
struct ClientConfig {
    ignore: Vec<String>,
    output: OutputConfig,
}

async fn handle_get_config(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(ClientConfig {
        ignore: state.config.ignore.clone(),
        output: state.config.output.clone(),
    })
}

// ============ Generation ============

async fn handle_generate(
    State(state): State<AppState>,
    Json(spec): Json<GenerateSpec>,
) -> Result<Json<GenerationResult>, AppError> {
    if spec.files.is_empty() {
        return Err(bad_request("Files array is required and must not be empty"));
    }
    if spec.name.trim().is_empty() {
        return Err(bad_request("Name is required and must be a string"));
    }
    let group_id = match spec.group_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => return Err(bad_request("Group ID is required")),
    };
    // The id becomes a path component; reject anything that is not a slug.
    if !is_valid_slug(&group_id) {
        return Err(bad_request(format!("Invalid group id: '{}'", group_id)));
    }

    state
        .store
        .create_group_directory(&group_id)
        .await
        .map_err(|e| classify_error("Failed to generate content file", e))?;

    let result = generate_content_file(&state.watch_dir, &state.config, &spec)
        .await
        .map_err(|e| classify_error("Failed to generate content file", e))?;

    state
        .store
        .add_generation_to_history(&group_id, &result.path)
        .await
        .map_err(|e| classify_error("Failed to generate content file", e))?;

    Ok(Json(result))
}

// ============ Groups ============

#[derive(Serialize)]
struct GroupsResponse {
    groups: Vec<Group>,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn handle_get_groups(State(state): State<AppState>) -> Json<GroupsResponse> {
    Json(GroupsResponse {
        groups: state.store.get_groups().await,
    })
}

/// Replace the whole registry. Every group gets its directory ensured and
/// its file list deduplicated before the document is persisted.
async fn handle_save_groups(
    State(state): State<AppState>,
    Json(mut groups): Json<Vec<Group>>,
) -> Result<Json<SuccessResponse>, AppError> {
    for group in &mut groups {
        if !is_valid_slug(&group.id) {
            return Err(bad_request(format!("Invalid group id: '{}'", group.id)));
        }
        group.dedup_files();
        state
            .store
            .create_group_directory(&group.id)
            .await
            .map_err(|e| classify_error("Failed to save groups", e))?;
    }

    state
        .store
        .save_groups(&groups)
        .await
        .map_err(|e| classify_error("Failed to save groups", e))?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn handle_update_group(
    State(state): State<AppState>,
    AxumPath(old_id): AxumPath<String>,
    Json(mut updated): Json<Group>,
) -> Result<Json<Group>, AppError> {
    if !is_valid_slug(&updated.id) {
        return Err(bad_request(format!("Invalid group id: '{}'", updated.id)));
    }
    updated.dedup_files();

    let mut groups = state.store.get_groups().await;
    let index = groups
        .iter()
        .position(|g| g.id == old_id)
        .ok_or_else(|| not_found("Group not found"))?;

    if old_id != updated.id {
        state
            .store
            .rename_group_directory(&old_id, &updated.id)
            .await
            .map_err(|e| classify_error("Failed to update group", e))?;
    } else {
        // Ensure the directory exists even when the id is unchanged.
        state
            .store
            .create_group_directory(&updated.id)
            .await
            .map_err(|e| classify_error("Failed to update group", e))?;
    }

    groups[index] = updated.clone();
    state
        .store
        .save_groups(&groups)
        .await
        .map_err(|e| classify_error("Failed to update group", e))?;

    Ok(Json(updated))
}

async fn handle_delete_group(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let groups = state.store.get_groups().await;
    let remaining: Vec<Group> = groups.iter().filter(|g| g.id != group_id).cloned().collect();

    if remaining.len() == groups.len() {
        return Err(not_found("Group not found"));
    }

    state
        .store
        .delete_group_directory(&group_id)
        .await
        .map_err(|e| classify_error("Failed to delete group", e))?;
    state
        .store
        .save_groups(&remaining)
        .await
        .map_err(|e| classify_error("Failed to delete group", e))?;

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest {
    file_name: String,
}

async fn handle_add_history(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<String>,
    Json(request): Json<HistoryRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .store
        .add_generation_to_history(&group_id, &request.file_name)
        .await
        .map_err(|e| classify_error("Failed to update group history", e))?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============ Live channel ============

async fn handle_ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection socket task.
///
/// On connect: push the current file list and group list as two discrete
/// messages. Then: forward hub broadcasts, probe liveness on a fixed
/// interval, and terminate if the previous probe went unanswered.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (client_id, mut outbound) = state.hub.register().await;
    info!(client_id, "Client connected");

    match scan_files(&state).await {
        Ok(files) => {
            if send_message(&mut socket, &ServerMessage::file_list(files))
                .await
                .is_err()
            {
                state.hub.unregister(client_id).await;
                return;
            }
        }
        Err(err) => warn!(client_id, "Error sending initial file list: {:#}", err),
    }

    let groups = state.store.get_groups().await;
    if send_message(&mut socket, &ServerMessage::Groups { groups })
        .await
        .is_err()
    {
        state.hub.unregister(client_id).await;
        return;
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it as the initial arm.
    ping_interval.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            Some(out) = outbound.recv() => match out {
                Outbound::Message(message) => {
                    if send_message(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },

            _ = ping_interval.tick() => {
                if awaiting_pong {
                    debug!(client_id, "Terminating inactive client");
                    break;
                }
                awaiting_pong = true;
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Push-only channel; client payloads are ignored.
                }
                Some(Err(err)) => {
                    debug!(client_id, "WebSocket error: {}", err);
                    break;
                }
            },
        }
    }

    state.hub.unregister(client_id).await;
    info!(client_id, "Client disconnected");
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("server messages serialize");
    socket.send(Message::Text(text.into())).await
}
