use crate::SyncConfig;
use thiserror::Error;
use tracing::debug;
use ttm_core::{PreviewState, PublishRequest, PublishResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("publish transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("publish rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },
}

/// Successful publish outcome as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub live_url: String,
    pub message: String,
}

/// Request/response client for the hub's preview API: the one-shot fallback
/// fetch and the publish command. Independent of the live channel.
#[derive(Clone)]
pub struct PreviewApi {
    config: SyncConfig,
    http: reqwest::Client,
}

impl PreviewApi {
    pub fn new(config: SyncConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.fallback_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    /// One-shot retrieval of the full preview state. `Ok(None)` means the
    /// session does not exist or has expired, which is distinct from a
    /// transport failure.
    pub async fn fetch_preview(
        &self,
        preview_id: &str,
    ) -> Result<Option<PreviewState>, ClientError> {
        let url = self.config.api_url(&format!("api/preview/{preview_id}"))?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(event = "preview_not_found", preview_id = preview_id);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        Ok(Some(response.json().await?))
    }

    /// Sends the promote-to-published command and faithfully reports the
    /// outcome. Never retries, and keeps no local "already published" state:
    /// the server is the single source of truth for that transition.
    pub async fn publish(
        &self,
        preview_id: &str,
        trigger_rebuild: bool,
    ) -> Result<PublishReceipt, PublishError> {
        let url = self
            .config
            .api_url("api/publish")
            .map_err(|err| PublishError::InvalidUrl(err.to_string()))?;
        let request = PublishRequest {
            preview_id: preview_id.to_string(),
            trigger_netlify_rebuild: trigger_rebuild,
        };
        let response = self.http.post(url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                reason: rejection_reason(&body),
            });
        }
        let outcome: PublishResponse = response.json().await?;
        match (outcome.success, outcome.live_url) {
            (true, Some(live_url)) => Ok(PublishReceipt {
                live_url,
                message: outcome.message,
            }),
            _ => Err(PublishError::Rejected {
                status: status.as_u16(),
                reason: outcome.message,
            }),
        }
    }
}

/// Pulls a human-readable reason out of an error body, falling back to the
/// raw text.
fn rejection_reason(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message"] {
            if let Some(reason) = value.get(key).and_then(|v| v.as_str()) {
                if !reason.is_empty() {
                    return reason.to_string();
                }
            }
        }
    }
    if body.trim().is_empty() {
        "server returned an error with no detail".to_string()
    } else {
        body.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reason_prefers_detail_field() {
        assert_eq!(
            rejection_reason(r#"{"detail":"Preview not found"}"#),
            "Preview not found"
        );
        assert_eq!(
            rejection_reason(r#"{"success":false,"message":"upload failed"}"#),
            "upload failed"
        );
        assert_eq!(rejection_reason("plain text"), "plain text");
        assert_eq!(
            rejection_reason(""),
            "server returned an error with no detail"
        );
    }
}
