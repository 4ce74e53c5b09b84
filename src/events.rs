//! Event bus for player state notifications
//!
//! Broadcasts discrete session events (status changes, ticket renewals,
//! reconnect scheduling) to any number of subscribers. Fire-and-forget:
//! with no subscribers an event is silently dropped.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::session::PlayerStatus;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Discrete events published by a player session
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Session status changed
    StatusChanged {
        stream_id: Option<String>,
        status: PlayerStatus,
    },
    /// Initial ticket issued
    TicketIssued {
        stream_id: String,
        expires_at: DateTime<Utc>,
    },
    /// Ticket replaced by a preemptive renewal
    TicketRenewed {
        stream_id: String,
        expires_at: DateTime<Utc>,
    },
    /// Renewal returned a different playback endpoint; the transport
    /// must be re-negotiated against the new URL
    EndpointChanged { stream_id: String, whep_url: String },
    /// A reconnect attempt was scheduled
    ReconnectScheduled {
        stream_id: String,
        attempt: u32,
        delay: Duration,
    },
    /// Reconnection gave up; the session is in a terminal error state
    ReconnectGaveUp { stream_id: String, message: String },
}

/// Broadcast bus for [`PlayerEvent`]s
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub fn publish(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// The receiver uses a ring buffer; a subscriber that falls too far
    /// behind receives a `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
