//! Play tickets: short-lived playback credentials
//!
//! A ticket authorizes playback of one stream. It carries its own expiry
//! and the WHEP endpoint the credential is valid for. Tickets are never
//! mutated; renewal replaces the whole value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::error::{PlayerError, Result};

/// Playback credential for a single stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub stream_id: String,
    /// Opaque credential string
    pub play_ticket: String,
    /// Absolute expiry timestamp
    pub expires_at: DateTime<Utc>,
    /// WHEP endpoint this ticket authorizes
    pub whep_url: String,
}

impl Ticket {
    /// Remaining validity measured from `now`. Negative when expired.
    pub fn ttl_from(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }
}

/// Issues and renews play tickets
///
/// The session controller talks to this trait rather than to [`ApiClient`]
/// directly so tests can script issuance outcomes.
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    /// `POST /v1/streams/{id}/play-ticket`
    async fn issue(&self, stream_id: &str) -> Result<Ticket>;
}

#[async_trait]
impl TicketIssuer for ApiClient {
    async fn issue(&self, stream_id: &str) -> Result<Ticket> {
        self.post_json(&format!("/v1/streams/{}/play-ticket", stream_id))
            .await
            .map_err(|e| PlayerError::TicketIssuance(e.to_string()))
    }
}
