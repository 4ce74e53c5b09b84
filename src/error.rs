use thiserror::Error;

/// Player-wide error type
///
/// Errors never cross a component boundary as panics; they are converted
/// into session events or reported through the transport phase.
#[derive(Error, Debug, Clone)]
pub enum PlayerError {
    #[error("Ticket issuance failed: {0}")]
    TicketIssuance(String),

    #[error("Ticket expired: {0}")]
    TicketExpired(String),

    #[error("Transport negotiation failed: {0}")]
    Negotiation(String),

    #[error("Transport connection lost: {0}")]
    Connection(String),

    #[error("Reconnect attempts exhausted: {0}")]
    ReconnectExhausted(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;
