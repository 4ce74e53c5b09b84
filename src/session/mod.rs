//! Session layer: the ticket lifecycle controller and its parts
//!
//! The state machine itself is pure ([`machine`]); the controller owns it
//! together with the per-session timers and drives ticket issuance,
//! preemptive renewal and reconnection with backoff.

pub mod controller;
pub mod machine;
pub mod timers;

pub use controller::PlayerSession;
pub use machine::{reduce, PlayerState, PlayerStatus, SessionEvent};
pub use timers::{TimerKind, TimerSet};
