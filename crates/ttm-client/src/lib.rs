use std::time::Duration;
use url::Url;

pub mod api;
pub mod connection;
pub mod sync;

pub use api::{ClientError, PreviewApi, PublishError, PublishReceipt};
pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionManager};
pub use sync::{PreviewSync, SessionSnapshot, SyncPhase};
pub use ttm_core::ConnectionState;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_FALLBACK_GRACE: Duration = Duration::from_millis(500);
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for one studio hub. Intervals are fields rather than
/// constants so tests can run them in milliseconds.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub base_url: Url,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub fallback_grace: Duration,
    pub fallback_timeout: Duration,
}

impl SyncConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            fallback_grace: DEFAULT_FALLBACK_GRACE,
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
        }
    }

    pub fn parse(base_url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(base_url).map_err(|err| ClientError::InvalidUrl(err.to_string()))?;
        Ok(Self::new(url))
    }

    /// Live-channel endpoint for a preview: `ws(s)://<hub>/ws/<preview_id>`.
    pub fn ws_url(&self, preview_id: &str) -> Result<Url, ClientError> {
        let mut url = self.api_url(&format!("ws/{preview_id}"))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            "ws" | "wss" => return Ok(url),
            other => return Err(ClientError::InvalidUrl(format!("unsupported scheme: {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl("cannot derive ws scheme".to_string()))?;
        Ok(url)
    }

    pub fn api_url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|err| ClientError::InvalidUrl(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derives_scheme_from_base() {
        let config = SyncConfig::parse("http://127.0.0.1:3001/").unwrap();
        let url = config.ws_url("prev-1").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:3001/ws/prev-1");

        let secure = SyncConfig::parse("https://studio.example.com/").unwrap();
        assert_eq!(
            secure.ws_url("prev-1").unwrap().as_str(),
            "wss://studio.example.com/ws/prev-1"
        );
    }

    #[test]
    fn api_url_joins_path() {
        let config = SyncConfig::parse("http://127.0.0.1:3001/").unwrap();
        assert_eq!(
            config.api_url("api/preview/prev-1").unwrap().as_str(),
            "http://127.0.0.1:3001/api/preview/prev-1"
        );
    }

    #[test]
    fn rejects_non_http_base() {
        let config = SyncConfig::parse("file:///tmp/studio").unwrap();
        assert!(config.ws_url("prev-1").is_err());
    }
}
