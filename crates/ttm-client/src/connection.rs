use crate::{ClientError, SyncConfig};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, warn};
use ttm_core::{ConnectionState, PreviewMessage, HEARTBEAT_FRAME};
use url::Url;

/// Event emitted by the live channel for one preview session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Status(ConnectionState),
    Message(PreviewMessage),
}

/// Owns one logical live channel: dials it, heartbeats it, and redials it
/// after every closure until [`ConnectionHandle::close`] is called.
pub struct ConnectionManager {
    config: SyncConfig,
}

impl ConnectionManager {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Opens the channel for a preview. Events arrive on the returned
    /// receiver in arrival order; the handle tears the channel down.
    pub fn open(
        &self,
        preview_id: &str,
    ) -> Result<(ConnectionHandle, mpsc::Receiver<ConnectionEvent>), ClientError> {
        let url = self.config.ws_url(preview_id)?;
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            run_channel(config, url, events_tx, shutdown_rx).await;
        });
        let handle = ConnectionHandle {
            shutdown: shutdown_tx,
            task: Some(task),
        };
        Ok((handle, events_rx))
    }
}

pub struct ConnectionHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Cancels the heartbeat ticker and any pending reconnect delay, closes
    /// the socket, and waits for the channel task to finish. After this
    /// returns no further events are emitted.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Closed {
    Stream,
    Shutdown,
}

async fn run_channel(
    config: SyncConfig,
    url: Url,
    events: mpsc::Sender<ConnectionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if send_status(&events, ConnectionState::Connecting).await.is_err() {
            return;
        }

        let dialed = tokio::select! {
            result = connect_async(url.as_str()) => Some(result),
            _ = shutdown.changed() => None,
        };
        let Some(dialed) = dialed else { return };

        match dialed {
            Ok((socket, _)) => {
                debug!(event = "channel_connected", url = %url);
                if send_status(&events, ConnectionState::Connected).await.is_err() {
                    return;
                }
                let closed = drive_socket(&config, socket, &events, &mut shutdown).await;
                // A stream closure that races a requested teardown must stay
                // silent: no events after close().
                if matches!(closed, Closed::Shutdown) || *shutdown.borrow() {
                    return;
                }
                if send_status(&events, ConnectionState::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(event = "connect_error", url = %url, error = %err);
                if *shutdown.borrow() {
                    return;
                }
                if send_status(&events, ConnectionState::Disconnected).await.is_err() {
                    return;
                }
            }
        }

        // Exactly one reconnect attempt per closure, after a fixed delay.
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn drive_socket(
    config: &SyncConfig,
    mut socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    events: &mpsc::Sender<ConnectionEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Closed {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick of an interval completes immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let ping = tungstenite::Message::Text(HEARTBEAT_FRAME.to_string());
                if socket.send(ping).await.is_err() {
                    return Closed::Stream;
                }
            }
            frame = socket.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<PreviewMessage>(&text) {
                            Ok(message) => {
                                if events
                                    .send(ConnectionEvent::Message(message))
                                    .await
                                    .is_err()
                                {
                                    return Closed::Shutdown;
                                }
                            }
                            // Malformed payloads are dropped; they never
                            // close the channel or change connection state.
                            Err(err) => {
                                warn!(event = "message_invalid", error = %err);
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        return Closed::Stream;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "read_error", error = %err);
                        return Closed::Stream;
                    }
                }
            }
            _ = shutdown.changed() => {
                let _ = socket.close(None).await;
                return Closed::Shutdown;
            }
        }
    }
}

async fn send_status(
    events: &mpsc::Sender<ConnectionEvent>,
    status: ConnectionState,
) -> Result<(), ()> {
    events
        .send(ConnectionEvent::Status(status))
        .await
        .map_err(|_| ())
}
