//! HTTP client for the directory and ticket-issuance API
//!
//! The directory service (stations, gates, streams) is an external
//! collaborator; this module only implements the contract the player
//! consumes from it, plus the play-ticket issuance call.

pub mod directory;
pub mod ticket;

pub use directory::{Gate, Station, Stream};
pub use ticket::{Ticket, TicketIssuer};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{PlayerError, Result};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shape of the service's error responses. Either field may be present;
/// `detail` wins when both are.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
    message: Option<String>,
}

/// Client for the directory / ticket API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client rooted at `base_url` (e.g. `http://host:8080/api`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PlayerError::Api(e.to_string()))?;
        Self::decode(resp).await
    }

    pub(crate) async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "POST");
        let resp = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PlayerError::Api(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlayerError::Api(extract_error_message(status, &body)));
        }
        resp.json::<T>()
            .await
            .map_err(|e| PlayerError::Api(format!("invalid response body: {}", e)))
    }
}

/// Pull a human-readable message out of an error response. The service
/// reports failures as JSON with a `detail` or `message` field; anything
/// else falls back to status plus raw body.
fn extract_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(msg) = parsed.detail.or(parsed.message) {
            return msg;
        }
    }
    format!("HTTP {}: {}", status.as_u16(), body)
}
