//! gateview - credentialed live-stream playback over WHEP
//!
//! This crate drives continuous playback of a live stream using a
//! short-lived play ticket that is renewed before expiry without
//! interrupting playback, and recovers automatically from transient
//! failures:
//!
//! - [`session`]: the ticket lifecycle controller (issuance, jittered
//!   preemptive renewal, hard-expiry safety net, bounded-backoff
//!   reconnection)
//! - [`whep`]: the transport negotiator (offer/answer handshake against
//!   the ticket's playback endpoint) and the video sink contract
//! - [`api`]: the directory / ticket-issuance HTTP contract

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod whep;

pub use error::{PlayerError, Result};
