//! Session state machine
//!
//! A pure transition table: [`reduce`] maps (state, event) to the next
//! state and performs no I/O. Timers, network calls and event publication
//! are the controller's business; everything here is independently
//! testable.

use crate::api::Ticket;

/// Coarse status tag for a [`PlayerState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    IssuingTicket,
    Ready,
    Connecting,
    Playing,
    Paused,
    RefreshingTicket,
    Reconnecting,
    Disconnected,
    Error,
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlayerStatus::Idle => "idle",
            PlayerStatus::IssuingTicket => "issuing_ticket",
            PlayerStatus::Ready => "ready",
            PlayerStatus::Connecting => "connecting",
            PlayerStatus::Playing => "playing",
            PlayerStatus::Paused => "paused",
            PlayerStatus::RefreshingTicket => "refreshing_ticket",
            PlayerStatus::Reconnecting => "reconnecting",
            PlayerStatus::Disconnected => "disconnected",
            PlayerStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Full session state, one variant per status
///
/// Every ticket-bearing variant owns exactly one current [`Ticket`];
/// renewal swaps the whole value.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    Idle,
    IssuingTicket {
        stream_id: String,
    },
    Ready {
        ticket: Ticket,
    },
    Connecting {
        ticket: Ticket,
    },
    Playing {
        ticket: Ticket,
    },
    Paused {
        ticket: Ticket,
    },
    RefreshingTicket {
        ticket: Ticket,
    },
    Reconnecting {
        stream_id: String,
        attempt: u32,
        last_error: Option<String>,
    },
    Disconnected {
        stream_id: Option<String>,
    },
    Error {
        stream_id: Option<String>,
        message: String,
    },
}

impl PlayerState {
    pub fn status(&self) -> PlayerStatus {
        match self {
            PlayerState::Idle => PlayerStatus::Idle,
            PlayerState::IssuingTicket { .. } => PlayerStatus::IssuingTicket,
            PlayerState::Ready { .. } => PlayerStatus::Ready,
            PlayerState::Connecting { .. } => PlayerStatus::Connecting,
            PlayerState::Playing { .. } => PlayerStatus::Playing,
            PlayerState::Paused { .. } => PlayerStatus::Paused,
            PlayerState::RefreshingTicket { .. } => PlayerStatus::RefreshingTicket,
            PlayerState::Reconnecting { .. } => PlayerStatus::Reconnecting,
            PlayerState::Disconnected { .. } => PlayerStatus::Disconnected,
            PlayerState::Error { .. } => PlayerStatus::Error,
        }
    }

    /// The current ticket, if this is a ticket-bearing state
    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            PlayerState::Ready { ticket }
            | PlayerState::Connecting { ticket }
            | PlayerState::Playing { ticket }
            | PlayerState::Paused { ticket }
            | PlayerState::RefreshingTicket { ticket } => Some(ticket),
            _ => None,
        }
    }

    pub fn has_ticket(&self) -> bool {
        self.ticket().is_some()
    }

    /// Stream id known to this state, from the ticket or the state itself
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            PlayerState::IssuingTicket { stream_id }
            | PlayerState::Reconnecting { stream_id, .. } => Some(stream_id),
            PlayerState::Disconnected { stream_id } | PlayerState::Error { stream_id, .. } => {
                stream_id.as_deref()
            }
            other => other.ticket().map(|t| t.stream_id.as_str()),
        }
    }
}

/// Events driving the session state machine
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start {
        stream_id: String,
    },
    TicketOk {
        ticket: Ticket,
    },
    TicketFail {
        stream_id: String,
        attempt: u32,
        message: String,
    },
    Play,
    Pause,
    RefreshBegin,
    RefreshOk {
        ticket: Ticket,
        keep_playing: bool,
    },
    RefreshFail {
        stream_id: String,
        attempt: u32,
        message: String,
    },
    ReconnectScheduled {
        stream_id: String,
        attempt: u32,
        last_error: Option<String>,
    },
    ReconnectGiveUp {
        stream_id: String,
        message: String,
    },
    Disconnect,
    Reset,
}

/// Pure transition function. Invalid (state, event) pairs are no-ops,
/// not errors.
pub fn reduce(state: PlayerState, event: SessionEvent) -> PlayerState {
    match event {
        SessionEvent::Start { stream_id } => PlayerState::IssuingTicket { stream_id },

        SessionEvent::TicketOk { ticket } => PlayerState::Ready { ticket },

        SessionEvent::TicketFail {
            stream_id,
            attempt,
            message,
        }
        | SessionEvent::RefreshFail {
            stream_id,
            attempt,
            message,
        } => PlayerState::Reconnecting {
            stream_id,
            attempt,
            last_error: Some(message),
        },

        SessionEvent::Play => match state {
            PlayerState::Ready { ticket } | PlayerState::Paused { ticket } => {
                PlayerState::Playing { ticket }
            }
            other => other,
        },

        SessionEvent::Pause => match state {
            PlayerState::Playing { ticket } => PlayerState::Paused { ticket },
            other => other,
        },

        SessionEvent::RefreshBegin => match state {
            PlayerState::Ready { ticket }
            | PlayerState::Connecting { ticket }
            | PlayerState::Playing { ticket }
            | PlayerState::Paused { ticket }
            | PlayerState::RefreshingTicket { ticket } => {
                PlayerState::RefreshingTicket { ticket }
            }
            other => other,
        },

        // Renewal must be invisible: keep playing when playback was active.
        SessionEvent::RefreshOk {
            ticket,
            keep_playing,
        } => {
            if keep_playing {
                PlayerState::Playing { ticket }
            } else {
                PlayerState::Ready { ticket }
            }
        }

        SessionEvent::ReconnectScheduled {
            stream_id,
            attempt,
            last_error,
        } => PlayerState::Reconnecting {
            stream_id,
            attempt,
            last_error,
        },

        SessionEvent::ReconnectGiveUp { stream_id, message } => PlayerState::Error {
            stream_id: Some(stream_id),
            message,
        },

        SessionEvent::Disconnect => PlayerState::Disconnected {
            stream_id: state.stream_id().map(str::to_owned),
        },

        SessionEvent::Reset => PlayerState::Idle,
    }
}
