use crate::{PreviewPatch, PreviewState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client->server heartbeat, sent as a bare text frame.
pub const HEARTBEAT_FRAME: &str = "ping";

/// Server->client message on the live channel.
///
/// Wire shapes:
/// `{"type":"initial","data":{..}}`, `{"type":"update","data":{..}}`,
/// `{"type":"pong"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PreviewMessage {
    Initial(PreviewState),
    Update(PreviewPatch),
    Pong,
}

impl PreviewMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PreviewMessage::Initial(_) => "initial",
            PreviewMessage::Update(_) => "update",
            PreviewMessage::Pong => "pong",
        }
    }
}

/// Lifecycle of one live channel as seen by the consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
