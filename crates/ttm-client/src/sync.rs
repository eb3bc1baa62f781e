use crate::{ClientError, ConnectionEvent, ConnectionManager, PreviewApi, SyncConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ttm_core::{merge_message, ConnectionState, PreviewMessage, PreviewState};

/// Where the session is in its first-data lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Subscribed, but neither the live channel nor the fallback fetch has
    /// produced a defined state yet.
    AwaitingFirstData,
    /// State is defined, from a snapshot or from the fallback fetch.
    Live,
    /// The fallback said not-found (or failed) and no live data ever
    /// arrived. Terminal for automatic retries; a later snapshot still
    /// supersedes it.
    Unavailable,
}

/// What a consumer of one preview session observes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: Option<PreviewState>,
    pub status: ConnectionState,
    pub phase: SyncPhase,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            state: None,
            status: ConnectionState::Disconnected,
            phase: SyncPhase::AwaitingFirstData,
        }
    }

    pub fn not_found(&self) -> bool {
        self.phase == SyncPhase::Unavailable
    }
}

/// Session view model: composes the connection manager, the merge engine,
/// and a single fallback fetch into one authoritative state cell, published
/// through a watch channel.
pub struct PreviewSync {
    snapshots: watch::Receiver<SessionSnapshot>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PreviewSync {
    pub fn observe(config: SyncConfig, preview_id: &str) -> Result<Self, ClientError> {
        // Validate both endpoints up front so the driver cannot fail on urls.
        config.ws_url(preview_id)?;
        let api = PreviewApi::new(config.clone())?;

        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let preview_id = preview_id.to_string();
        let task = tokio::spawn(async move {
            run_session(config, api, preview_id, snapshot_tx, shutdown_rx).await;
        });
        Ok(Self {
            snapshots: snapshot_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }

    /// A watch receiver over `{state, status, phase}`; `changed().await`
    /// wakes on every transition.
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn current(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Stops observing: tears down the live channel and renders any
    /// in-flight fallback fetch inert. No snapshot updates after this
    /// returns.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PreviewSync {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_session(
    config: SyncConfig,
    api: PreviewApi,
    preview_id: String,
    snapshots: watch::Sender<SessionSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let manager = ConnectionManager::new(config.clone());
    let (handle, mut events) = match manager.open(&preview_id) {
        Ok(value) => value,
        Err(err) => {
            // Urls were validated in observe(); this is unreachable in
            // practice but must not panic the driver.
            warn!(event = "channel_open_error", error = %err);
            return;
        }
    };

    let (fallback_tx, mut fallback_rx) =
        mpsc::channel::<Result<Option<PreviewState>, ClientError>>(1);
    let mut fallback_task: Option<JoinHandle<()>> = None;
    let mut fallback_armed = true;
    let mut snapshot = SessionSnapshot::initial();

    let grace = tokio::time::sleep(config.fallback_grace);
    tokio::pin!(grace);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => {
                match event {
                    Some(ConnectionEvent::Status(status)) => {
                        snapshot.status = status;
                        publish(&snapshots, &snapshot);
                    }
                    Some(ConnectionEvent::Message(message)) => {
                        let is_snapshot = matches!(message, PreviewMessage::Initial(_));
                        snapshot.state = merge_message(snapshot.state.as_ref(), &message);
                        if snapshot.state.is_some() {
                            snapshot.phase = SyncPhase::Live;
                        }
                        if is_snapshot {
                            // Live data won the race; a stale fetch result
                            // must not overwrite it.
                            fallback_armed = false;
                            if let Some(task) = fallback_task.take() {
                                task.abort();
                            }
                        }
                        publish(&snapshots, &snapshot);
                    }
                    None => break,
                }
            }
            _ = &mut grace, if fallback_armed && fallback_task.is_none() => {
                if snapshot.state.is_some() {
                    fallback_armed = false;
                    continue;
                }
                debug!(event = "fallback_fetch", preview_id = %preview_id);
                let api = api.clone();
                let id = preview_id.clone();
                let tx = fallback_tx.clone();
                fallback_task = Some(tokio::spawn(async move {
                    let _ = tx.send(api.fetch_preview(&id).await).await;
                }));
            }
            result = fallback_rx.recv() => {
                fallback_task = None;
                fallback_armed = false;
                match result {
                    Some(Ok(Some(state))) => {
                        if snapshot.state.is_none() {
                            // Full replacement, same sense as a snapshot: it
                            // establishes the merge base for later patches.
                            snapshot.state = Some(state);
                            snapshot.phase = SyncPhase::Live;
                            publish(&snapshots, &snapshot);
                        }
                    }
                    Some(Ok(None)) => {
                        if snapshot.state.is_none() {
                            snapshot.phase = SyncPhase::Unavailable;
                            publish(&snapshots, &snapshot);
                        }
                    }
                    Some(Err(err)) => {
                        warn!(event = "fallback_error", error = %err);
                        if snapshot.state.is_none() {
                            snapshot.phase = SyncPhase::Unavailable;
                            publish(&snapshots, &snapshot);
                        }
                    }
                    None => {}
                }
            }
        }
    }

    if let Some(task) = fallback_task.take() {
        task.abort();
    }
    handle.close().await;
}

fn publish(snapshots: &watch::Sender<SessionSnapshot>, snapshot: &SessionSnapshot) {
    let _ = snapshots.send(snapshot.clone());
}
