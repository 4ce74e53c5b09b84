//! WHEP playback transport
//!
//! Receive-only WebRTC sessions negotiated over HTTP:
//!
//! ```text
//! Playback endpoint <--- POST offer (application/sdp) --- WhepConnection
//!        |                                                      |
//!        +------- answer SDP + Location (session URL) --------->+
//!        |                                                      |
//!        +=============== RTP media =====> VideoSink (first frame)
//! ```
//!
//! The connection reports its phase independently of the ticket session;
//! teardown DELETEs the session URL on a best-effort basis.

pub mod peer;
pub mod sink;

pub use peer::{TransportPhase, WhepConnection};
pub use sink::{PacketProbeSink, SinkEvent, VideoSink};
