//! Video sink contract
//!
//! A sink receives the remote media track and signals when the first
//! frame of data becomes visible. The render surface itself (a `<video>`
//! element, a decoder pipeline, a file writer) lives outside this crate;
//! [`PacketProbeSink`] is the built-in implementation that treats the
//! first RTP packet as the visibility signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;

const SINK_EVENT_CAPACITY: usize = 16;

/// Events emitted by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// First frame of media became visible. Emitted once per attach.
    FirstFrameRendered,
}

/// Receiving end for remote media
///
/// A sink is exclusively owned by at most one transport session at a
/// time; `attach` implies detaching any prior track first.
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Attach a remote track, replacing any prior one
    async fn attach(&self, track: Arc<TrackRemote>) -> Result<()>;

    /// Detach the current track, if any. Idempotent.
    async fn detach(&self);

    /// Begin presenting. Autoplay calls this right after attach; a
    /// rejection is reported to the caller, who may log and continue.
    async fn play(&self) -> Result<()>;

    /// Stop presenting without detaching
    async fn pause(&self);

    /// Subscribe to sink events. Subscribe before `attach` to be sure of
    /// observing the first-frame signal.
    fn subscribe(&self) -> broadcast::Receiver<SinkEvent>;
}

/// Sink that drains RTP from the attached track and reports the first
/// packet as the first visible frame
///
/// A paused probe keeps draining so the transport is not back-pressured;
/// it only stops counting toward the trace log.
pub struct PacketProbeSink {
    events: broadcast::Sender<SinkEvent>,
    playing: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl PacketProbeSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SINK_EVENT_CAPACITY);
        Self {
            events,
            playing: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Default for PacketProbeSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSink for PacketProbeSink {
    async fn attach(&self, track: Arc<TrackRemote>) -> Result<()> {
        let events = self.events.clone();
        let playing = self.playing.clone();

        let handle = tokio::spawn(async move {
            let mut packets: u64 = 0;
            loop {
                match track.read_rtp().await {
                    Ok((packet, _)) => {
                        packets += 1;
                        if packets == 1 {
                            debug!(ssrc = track.ssrc(), "first media packet arrived");
                            let _ = events.send(SinkEvent::FirstFrameRendered);
                        }
                        if playing.load(Ordering::SeqCst) {
                            trace!(
                                seq = packet.header.sequence_number,
                                size = packet.payload.len(),
                                "media packet"
                            );
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, packets, "track ended");
                        break;
                    }
                }
            }
        });

        if let Some(prev) = self.reader.lock().replace(handle) {
            prev.abort();
        }
        Ok(())
    }

    async fn detach(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }

    async fn play(&self) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }
}
