use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};
use ttm_core::{
    PreviewMessage, PreviewPatch, PreviewState, PublishRequest, PublishResponse, HEARTBEAT_FRAME,
};
use ttm_storage::{StorageError, StudioStore};

const MAX_FRAME_BYTES: usize = 256 * 1024;
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub addr: String,
    pub db_path: String,
    pub site_base: String,
    pub rebuild_hook: Option<String>,
    pub debug: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3001".to_string(),
            db_path: "data/studio.db".to_string(),
            site_base: "https://toptiermodels.com".to_string(),
            rebuild_hook: None,
            debug: false,
        }
    }
}

pub struct HubState {
    config: HubConfig,
    store: AsyncMutex<StudioStore>,
    conn_counter: AtomicU64,
    // preview_id -> conn_id -> writer
    sockets: RwLock<HashMap<String, HashMap<u64, mpsc::Sender<Message>>>>,
    http: reqwest::Client,
}

impl HubState {
    pub fn new(config: HubConfig, store: StudioStore) -> Self {
        Self {
            config,
            store: AsyncMutex::new(store),
            conn_counter: AtomicU64::new(0),
            sockets: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    fn next_conn_id(&self) -> u64 {
        self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn register_socket(&self, preview_id: &str, conn_id: u64, tx: mpsc::Sender<Message>) {
        let mut sockets = self.sockets.write().await;
        sockets
            .entry(preview_id.to_string())
            .or_default()
            .insert(conn_id, tx);
        info!(event = "viewer_connected", preview_id = preview_id, conn_id = conn_id);
    }

    async fn remove_socket(&self, preview_id: &str, conn_id: u64) {
        let mut sockets = self.sockets.write().await;
        if let Some(entry) = sockets.get_mut(preview_id) {
            entry.remove(&conn_id);
            if entry.is_empty() {
                sockets.remove(preview_id);
            }
        }
        info!(event = "viewer_disconnected", preview_id = preview_id, conn_id = conn_id);
    }

    /// Upserts a session and pushes the fresh snapshot to attached viewers.
    pub async fn save_preview(&self, state: &PreviewState) -> Result<PreviewState, StorageError> {
        let saved = {
            let store = self.store.lock().await;
            store.save_preview(state)?
        };
        info!(event = "preview_saved", preview_id = %saved.preview_id);
        self.broadcast(&saved.preview_id, &PreviewMessage::Initial(saved.clone()))
            .await;
        Ok(saved)
    }

    /// Merges a patch into a stored session and relays the patch itself to
    /// attached viewers. `Ok(None)` when no base session exists.
    pub async fn apply_patch(
        &self,
        preview_id: &str,
        patch: &PreviewPatch,
    ) -> Result<Option<PreviewState>, StorageError> {
        let merged = {
            let store = self.store.lock().await;
            store.apply_patch(preview_id, patch)?
        };
        if merged.is_some() {
            info!(event = "preview_patched", preview_id = preview_id);
            self.broadcast(preview_id, &PreviewMessage::Update(patch.clone()))
                .await;
        }
        Ok(merged)
    }

    pub async fn get_preview(&self, preview_id: &str) -> Result<Option<PreviewState>, StorageError> {
        let store = self.store.lock().await;
        store.get_preview(preview_id)
    }

    /// Sends a message to every socket attached to the preview, pruning
    /// writers whose channel is gone.
    pub async fn broadcast(&self, preview_id: &str, message: &PreviewMessage) {
        let text = match serde_json::to_string(message) {
            Ok(value) => value,
            Err(err) => {
                error!(event = "broadcast_encode_error", error = %err);
                return;
            }
        };
        let targets: Vec<(u64, mpsc::Sender<Message>)> = {
            let sockets = self.sockets.read().await;
            sockets
                .get(preview_id)
                .map(|entry| entry.iter().map(|(id, tx)| (*id, tx.clone())).collect())
                .unwrap_or_default()
        };
        let mut dead = Vec::new();
        for (conn_id, tx) in targets {
            if tx.send(Message::Text(text.clone())).await.is_err() {
                warn!(event = "send_error", preview_id = preview_id, conn_id = conn_id);
                dead.push(conn_id);
            }
        }
        for conn_id in dead {
            self.remove_socket(preview_id, conn_id).await;
        }
    }

    /// Closes every live socket attached to a preview, e.g. when the
    /// session is deleted out from under its viewers.
    pub async fn kick_viewers(&self, preview_id: &str) {
        let entry = {
            let mut sockets = self.sockets.write().await;
            sockets.remove(preview_id)
        };
        let Some(entry) = entry else { return };
        for (conn_id, tx) in entry {
            let _ = tx.send(Message::Close(None)).await;
            info!(event = "viewer_kicked", preview_id = preview_id, conn_id = conn_id);
        }
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, preview_id: String) {
        use futures_util::{SinkExt, StreamExt};

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let send = ws_sender.send(msg);
                if tokio::time::timeout(WRITE_TIMEOUT, send).await.is_err() {
                    return;
                }
            }
        });

        let conn_id = self.next_conn_id();
        self.register_socket(&preview_id, conn_id, tx.clone()).await;

        // Viewers get the current draft as soon as they attach.
        let initial = {
            let store = self.store.lock().await;
            store.get_preview(&preview_id)
        };
        match initial {
            Ok(Some(state)) => {
                if let Ok(text) = serde_json::to_string(&PreviewMessage::Initial(state)) {
                    let _ = tx.send(Message::Text(text)).await;
                }
            }
            Ok(None) => {
                debug!(event = "initial_skipped", preview_id = %preview_id);
            }
            Err(err) => {
                error!(event = "initial_load_error", preview_id = %preview_id, error = %err);
            }
        }

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = conn_id, error = %err);
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    if text.len() > MAX_FRAME_BYTES {
                        warn!(event = "frame_too_large", conn_id = conn_id, size = text.len());
                        continue;
                    }
                    if text.trim() == HEARTBEAT_FRAME {
                        if let Ok(pong) = serde_json::to_string(&PreviewMessage::Pong) {
                            let _ = tx.send(Message::Text(pong)).await;
                        }
                    } else {
                        warn!(event = "frame_ignored", conn_id = conn_id);
                    }
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => {
                    info!(event = "viewer_close", conn_id = conn_id);
                    break;
                }
                Message::Binary(_) => {
                    warn!(event = "frame_ignored", conn_id = conn_id);
                }
            }
        }

        self.remove_socket(&preview_id, conn_id).await;
        drop(tx);
        let _ = write_task.await;
    }
}

pub fn router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/previews", get(list_previews))
        .route("/api/preview", post(save_preview_route))
        .route(
            "/api/preview/:preview_id",
            get(get_preview_route)
                .patch(patch_preview_route)
                .delete(delete_preview),
        )
        .route("/api/publish", post(publish_preview))
        .route("/ws/:preview_id", get(ws_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(preview_id): Path<String>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, preview_id).await;
    })
}

async fn get_preview_route(
    Path(preview_id): Path<String>,
    State(hub): State<Arc<HubState>>,
) -> Response {
    match hub.get_preview(&preview_id).await {
        Ok(Some(state)) => Json(state).into_response(),
        Ok(None) => not_found("Preview not found"),
        Err(err) => storage_failure(err),
    }
}

async fn list_previews(State(hub): State<Arc<HubState>>) -> Response {
    let result = {
        let store = hub.store.lock().await;
        store.list_previews()
    };
    match result {
        Ok(previews) => Json(json!({ "previews": previews })).into_response(),
        Err(err) => storage_failure(err),
    }
}

async fn save_preview_route(
    State(hub): State<Arc<HubState>>,
    Json(state): Json<PreviewState>,
) -> Response {
    match hub.save_preview(&state).await {
        Ok(saved) => Json(json!({
            "message": "Preview saved successfully",
            "preview_id": saved.preview_id,
        }))
        .into_response(),
        Err(err) => storage_failure(err),
    }
}

async fn patch_preview_route(
    Path(preview_id): Path<String>,
    State(hub): State<Arc<HubState>>,
    Json(update): Json<PreviewPatch>,
) -> Response {
    match hub.apply_patch(&preview_id, &update).await {
        Ok(Some(merged)) => Json(merged).into_response(),
        Ok(None) => not_found("Preview not found"),
        Err(err) => storage_failure(err),
    }
}

async fn delete_preview(
    Path(preview_id): Path<String>,
    State(hub): State<Arc<HubState>>,
) -> Response {
    let result = {
        let store = hub.store.lock().await;
        store.delete_preview(&preview_id)
    };
    match result {
        Ok(true) => {
            info!(event = "preview_deleted", preview_id = %preview_id);
            hub.kick_viewers(&preview_id).await;
            Json(json!({ "message": "Preview deleted successfully" })).into_response()
        }
        Ok(false) => not_found("Preview not found"),
        Err(err) => storage_failure(err),
    }
}

async fn publish_preview(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<PublishRequest>,
) -> Response {
    {
        let store = hub.store.lock().await;
        match store.update_status(&request.preview_id, "pending") {
            Ok(true) => {}
            Ok(false) => return not_found("Preview not found"),
            Err(err) => return storage_failure(err),
        }
    }

    let promoted = {
        let store = hub.store.lock().await;
        store.publish_preview(&request.preview_id)
    };
    let article = match promoted {
        Ok(article) => article,
        Err(StorageError::MissingPreview(_)) => return not_found("Preview not found"),
        Err(err) => {
            error!(event = "publish_error", preview_id = %request.preview_id, error = %err);
            let _ = {
                let store = hub.store.lock().await;
                store.update_status(&request.preview_id, "draft")
            };
            return storage_failure(err);
        }
    };

    let live_url = format!(
        "{}/article/{}",
        hub.config.site_base.trim_end_matches('/'),
        article.slug
    );

    let mut message = "Published successfully".to_string();
    if request.trigger_netlify_rebuild {
        // Hook failures are reported, never fatal: the content is already live.
        match trigger_rebuild(&hub).await {
            Ok(true) => message.push_str(" (rebuild triggered)"),
            Ok(false) => message.push_str(" (rebuild hook not configured)"),
            Err(err) => {
                warn!(event = "rebuild_hook_error", error = %err);
                message.push_str(" (rebuild hook failed)");
            }
        }
    }

    info!(
        event = "preview_published",
        preview_id = %request.preview_id,
        slug = %article.slug,
        live_url = %live_url
    );
    Json(PublishResponse {
        success: true,
        message,
        live_url: Some(live_url),
        model_id: Some(article.model_name),
        article_id: Some(article.slug),
    })
    .into_response()
}

async fn trigger_rebuild(hub: &HubState) -> Result<bool, reqwest::Error> {
    let Some(hook) = hub.config.rebuild_hook.as_deref() else {
        return Ok(false);
    };
    let response = hub.http.post(hook).send().await?;
    Ok(response.status().is_success())
}

fn not_found(detail: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
}

fn storage_failure(err: StorageError) -> Response {
    error!(event = "storage_error", error = %err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttm_core::{ArticleDraftPatch, PreviewPatch};

    fn test_hub() -> HubState {
        let store = StudioStore::open_in_memory().unwrap();
        HubState::new(HubConfig::default(), store)
    }

    fn draft(preview_id: &str) -> PreviewState {
        let mut state = PreviewState {
            preview_id: preview_id.to_string(),
            model_data: Default::default(),
            article_data: Default::default(),
            linkedin_data: Default::default(),
            scores_data: Default::default(),
            publish_status: "draft".to_string(),
            created_at: String::new(),
            last_modified: String::new(),
        };
        state.article_data.title = "Draft".to_string();
        state.article_data.slug = "draft".to_string();
        state
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let hub = test_hub();
        hub.save_preview(&draft("prev-1")).await.unwrap();
        let loaded = hub.get_preview("prev-1").await.unwrap().unwrap();
        assert_eq!(loaded.article_data.title, "Draft");
        assert_eq!(loaded.publish_status, "draft");
    }

    #[tokio::test]
    async fn patch_without_base_is_a_no_op() {
        let hub = test_hub();
        let patch = PreviewPatch {
            article_data: Some(ArticleDraftPatch {
                title: Some("Ghost".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(hub.apply_patch("absent", &patch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_merges_into_stored_draft() {
        let hub = test_hub();
        hub.save_preview(&draft("prev-1")).await.unwrap();
        let patch = PreviewPatch {
            article_data: Some(ArticleDraftPatch {
                title: Some("Edited".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = hub.apply_patch("prev-1", &patch).await.unwrap().unwrap();
        assert_eq!(merged.article_data.title, "Edited");
        assert_eq!(merged.article_data.slug, "draft");
    }

    #[tokio::test]
    async fn kick_without_viewers_is_harmless() {
        let hub = test_hub();
        hub.kick_viewers("prev-1").await;
    }
}
