//! WHEP offer/answer negotiation
//!
//! One [`WhepConnection`] performs a single handshake against a playback
//! endpoint: build a receive-only peer connection, send the offer as an
//! HTTP POST with `application/sdp`, apply the answer, and from then on
//! media is driven entirely by the track and connection-state callbacks.
//! Teardown closes the peer connection and fires a best-effort DELETE at
//! the session URL the endpoint returned in its `Location` header.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Url;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::sink::{SinkEvent, VideoSink};
use crate::config::WhepConfig;
use crate::error::{PlayerError, Result};

/// Negotiation phase, independent of the ticket session's status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Idle,
    Connecting,
    /// Media is flowing; nothing guaranteed visible yet
    Connected,
    /// First frame reached the sink
    Rendering,
    Error,
    Disconnected,
}

impl std::fmt::Display for TransportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportPhase::Idle => "idle",
            TransportPhase::Connecting => "connecting",
            TransportPhase::Connected => "connected",
            TransportPhase::Rendering => "rendering",
            TransportPhase::Error => "error",
            TransportPhase::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Whether `next` is a legal phase move from `current`.
/// Rendering requires media to have been connected first, and a final
/// disconnect is never overwritten by a late error.
fn phase_transition_allowed(current: TransportPhase, next: TransportPhase) -> bool {
    use TransportPhase::*;
    if current == next {
        return false;
    }
    match next {
        Idle => false,
        Connecting => matches!(current, Idle),
        Connected => matches!(current, Connecting),
        Rendering => matches!(current, Connected),
        Error => !matches!(current, Disconnected),
        Disconnected => true,
    }
}

fn advance(phase_tx: &watch::Sender<TransportPhase>, next: TransportPhase) {
    phase_tx.send_if_modified(|phase| {
        if phase_transition_allowed(*phase, next) {
            debug!(from = %phase, to = %next, "transport phase");
            *phase = next;
            true
        } else {
            false
        }
    });
}

/// Resolve a `Location` header against the request URL. Handles both
/// relative and absolute session URLs.
fn resolve_session_url(endpoint: &str, location: &str) -> Option<Url> {
    let base = Url::parse(endpoint).ok()?;
    base.join(location).ok()
}

/// One-shot WHEP playback connection
///
/// Negotiates once; to retry, create a fresh connection. Retrying is the
/// session layer's responsibility, not this component's.
pub struct WhepConnection {
    id: String,
    endpoint: String,
    sink: Option<Arc<dyn VideoSink>>,
    config: WhepConfig,
    client: reqwest::Client,
    pc: tokio::sync::Mutex<Option<Arc<RTCPeerConnection>>>,
    session_url: tokio::sync::Mutex<Option<Url>>,
    phase_tx: Arc<watch::Sender<TransportPhase>>,
    phase_rx: watch::Receiver<TransportPhase>,
    manual_close: Arc<AtomicBool>,
    last_error: Arc<parking_lot::Mutex<Option<PlayerError>>>,
}

impl WhepConnection {
    pub fn new(
        endpoint: impl Into<String>,
        sink: Option<Arc<dyn VideoSink>>,
        config: WhepConfig,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(TransportPhase::Idle);
        Self {
            id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            sink,
            config,
            client: reqwest::Client::new(),
            pc: tokio::sync::Mutex::new(None),
            session_url: tokio::sync::Mutex::new(None),
            phase_tx: Arc::new(phase_tx),
            phase_rx,
            manual_close: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Current negotiation phase
    pub fn phase(&self) -> TransportPhase {
        *self.phase_rx.borrow()
    }

    /// Watch phase changes
    pub fn watch_phase(&self) -> watch::Receiver<TransportPhase> {
        self.phase_rx.clone()
    }

    /// Error recorded by the handshake or a later connectivity failure
    pub fn last_error(&self) -> Option<PlayerError> {
        self.last_error.lock().clone()
    }

    /// Perform the offer/answer handshake and start media flow
    pub async fn connect(&self) -> Result<()> {
        match self.negotiate().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(id = %self.id, error = %e, "negotiation failed");
                *self.last_error.lock() = Some(e.clone());
                advance(&self.phase_tx, TransportPhase::Error);
                // Clean up without overwriting the error phase.
                self.shutdown(false).await;
                Err(e)
            }
        }
    }

    async fn negotiate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(PlayerError::Negotiation(
                "playback endpoint URL is empty".to_string(),
            ));
        }
        let Some(sink) = self.sink.clone() else {
            return Err(PlayerError::Negotiation("no video sink available".to_string()));
        };
        if self.phase() != TransportPhase::Idle {
            return Err(PlayerError::Negotiation(
                "connection already negotiated".to_string(),
            ));
        }

        self.manual_close.store(false, Ordering::SeqCst);
        advance(&self.phase_tx, TransportPhase::Connecting);
        info!(id = %self.id, endpoint = %self.endpoint, "starting WHEP handshake");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PlayerError::Negotiation(format!("register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| PlayerError::Negotiation(format!("register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // No STUN/TURN servers: a direct network path is assumed.
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .map_err(|e| PlayerError::Negotiation(format!("create peer connection: {}", e)))?,
        );
        *self.pc.lock().await = Some(pc.clone());

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| PlayerError::Negotiation(format!("add video transceiver: {}", e)))?;

        // Track arrival: attach to the sink and follow its first-frame
        // signal into the rendering phase.
        let phase_tx = self.phase_tx.clone();
        let autoplay = self.config.autoplay;
        let conn_id = self.id.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = sink.clone();
            let phase_tx = phase_tx.clone();
            let conn_id = conn_id.clone();
            Box::pin(async move {
                info!(id = %conn_id, kind = %track.kind(), ssrc = track.ssrc(), "remote track arrived");

                // Subscribe before attaching so the first-frame signal
                // cannot be missed.
                let mut sink_events = sink.subscribe();
                if let Err(e) = sink.attach(track).await {
                    warn!(id = %conn_id, error = %e, "sink attach failed");
                    return;
                }
                advance(&phase_tx, TransportPhase::Connected);

                let render_tx = phase_tx.clone();
                tokio::spawn(async move {
                    while let Ok(event) = sink_events.recv().await {
                        if event == SinkEvent::FirstFrameRendered {
                            advance(&render_tx, TransportPhase::Rendering);
                            break;
                        }
                    }
                });

                if autoplay {
                    if let Err(e) = sink.play().await {
                        // Autoplay rejection is not fatal.
                        warn!(id = %conn_id, error = %e, "autoplay rejected");
                    }
                }
            })
        }));

        // Mirror the endpoint's own connectivity signal, suppressing the
        // error path once a manual teardown is in progress.
        let phase_tx = self.phase_tx.clone();
        let manual_close = self.manual_close.clone();
        let last_error = self.last_error.clone();
        let conn_id = self.id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let phase_tx = phase_tx.clone();
            let manual_close = manual_close.clone();
            let last_error = last_error.clone();
            let conn_id = conn_id.clone();
            Box::pin(async move {
                debug!(id = %conn_id, %state, "peer connection state");
                match state {
                    RTCPeerConnectionState::Connected => {
                        advance(&phase_tx, TransportPhase::Connected);
                    }
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        if !manual_close.load(Ordering::SeqCst) {
                            warn!(id = %conn_id, %state, "connection lost");
                            *last_error.lock() =
                                Some(PlayerError::Connection(format!("connection {}", state)));
                            advance(&phase_tx, TransportPhase::Error);
                        }
                    }
                    _ => {}
                }
            })
        }));

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| PlayerError::Negotiation(format!("create offer: {}", e)))?;

        let mut gather_done = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| PlayerError::Negotiation(format!("set local description: {}", e)))?;

        // Best-effort: on timeout, proceed with the candidates gathered so
        // far rather than failing.
        if tokio::time::timeout(self.config.ice_gathering_timeout(), gather_done.recv())
            .await
            .is_err()
        {
            debug!(id = %self.id, "ICE gathering timed out, proceeding with partial candidates");
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| PlayerError::Negotiation("local description missing".to_string()))?;

        debug!(id = %self.id, "posting offer ({} bytes)", local.sdp.len());
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/sdp")
            .body(local.sdp)
            .send()
            .await
            .map_err(|e| PlayerError::Negotiation(format!("handshake POST: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlayerError::Negotiation(format!(
                "handshake POST failed: {} {}",
                status.as_u16(),
                body
            )));
        }

        if let Some(location) = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
        {
            match resolve_session_url(&self.endpoint, &location) {
                Some(url) => {
                    debug!(id = %self.id, %url, "session URL stored");
                    *self.session_url.lock().await = Some(url);
                }
                None => warn!(id = %self.id, %location, "unusable Location header"),
            }
        }

        let answer_sdp = resp
            .text()
            .await
            .map_err(|e| PlayerError::Negotiation(format!("read answer: {}", e)))?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| PlayerError::Negotiation(format!("invalid answer SDP: {}", e)))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| PlayerError::Negotiation(format!("set remote description: {}", e)))?;

        info!(id = %self.id, "handshake complete, media flow is callback-driven");
        Ok(())
    }

    /// Tear the session down. Idempotent; always safe to call again.
    pub async fn close(&self) {
        self.shutdown(true).await;
    }

    async fn shutdown(&self, mark_disconnected: bool) {
        // Flag first, so the connection-state callback stays quiet about
        // the close we are about to cause.
        self.manual_close.store(true, Ordering::SeqCst);

        if let Some(sink) = &self.sink {
            sink.pause().await;
            sink.detach().await;
        }

        if let Some(pc) = self.pc.lock().await.take() {
            if let Err(e) = pc.close().await {
                debug!(id = %self.id, error = %e, "peer connection close");
            }
        }

        if let Some(url) = self.session_url.lock().await.take() {
            debug!(id = %self.id, %url, "sending session DELETE");
            if let Err(e) = self.client.delete(url).send().await {
                // Cleanup, not a required step.
                debug!(id = %self.id, error = %e, "session DELETE failed (ignored)");
            }
        }

        if mark_disconnected {
            advance(&self.phase_tx, TransportPhase::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whep::sink::PacketProbeSink;
    use std::sync::atomic::AtomicU32;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config() -> WhepConfig {
        WhepConfig {
            // Keep the gathering wait short; host candidates are enough.
            ice_gathering_timeout_ms: 200,
            autoplay: true,
        }
    }

    fn probe_sink() -> Arc<dyn VideoSink> {
        Arc::new(PacketProbeSink::new())
    }

    #[test]
    fn test_phase_transition_table() {
        use TransportPhase::*;
        assert!(phase_transition_allowed(Idle, Connecting));
        assert!(phase_transition_allowed(Connecting, Connected));
        assert!(phase_transition_allowed(Connected, Rendering));
        // Rendering is never reached without connected
        assert!(!phase_transition_allowed(Connecting, Rendering));
        assert!(!phase_transition_allowed(Idle, Rendering));
        // No downgrade from rendering to connected
        assert!(!phase_transition_allowed(Rendering, Connected));
        // A final disconnect is not overwritten by a late error
        assert!(!phase_transition_allowed(Disconnected, Error));
        assert!(phase_transition_allowed(Error, Disconnected));
        // Self-moves are filtered
        assert!(!phase_transition_allowed(Connected, Connected));
    }

    #[test]
    fn test_resolve_session_url() {
        let url = resolve_session_url("http://media.local:8889/cam-001/whep", "/session/abc")
            .unwrap();
        assert_eq!(url.as_str(), "http://media.local:8889/session/abc");

        let url = resolve_session_url(
            "http://media.local:8889/cam-001/whep",
            "http://other.local/session/xyz",
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://other.local/session/xyz");

        // Relative without leading slash resolves against the endpoint path
        let url =
            resolve_session_url("http://media.local:8889/cam-001/whep", "sessions/1").unwrap();
        assert_eq!(url.as_str(), "http://media.local:8889/cam-001/sessions/1");

        assert!(resolve_session_url("not a url", "/session/abc").is_none());
    }

    #[tokio::test]
    async fn test_empty_endpoint_rejected() {
        let conn = WhepConnection::new("", Some(probe_sink()), test_config());
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, PlayerError::Negotiation(_)));
        assert_eq!(conn.phase(), TransportPhase::Error);
    }

    #[tokio::test]
    async fn test_missing_sink_rejected() {
        let conn = WhepConnection::new("http://media.local/whep", None, test_config());
        let err = conn.connect().await.unwrap_err();
        assert!(err.to_string().contains("sink"));
        assert_eq!(conn.phase(), TransportPhase::Error);
    }

    #[tokio::test]
    async fn test_handshake_error_carries_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let body = "media engine exploded";
            let response = format!(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        let endpoint = format!("http://{}/cam-001/whep", addr);
        let conn = WhepConnection::new(endpoint, Some(probe_sink()), test_config());
        let err = conn.connect().await.unwrap_err();

        assert!(err.to_string().contains("500"), "got: {}", err);
        assert!(err.to_string().contains("media engine exploded"), "got: {}", err);
        assert_eq!(conn.phase(), TransportPhase::Error);
        assert!(conn.last_error().is_some());
    }

    #[tokio::test]
    async fn test_teardown_sends_exactly_one_delete() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let deletes = Arc::new(AtomicU32::new(0));

        let counter = deletes.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if buf[..n].starts_with(b"DELETE") {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                });
            }
        });

        let conn = WhepConnection::new(
            format!("http://{}/cam-001/whep", addr),
            Some(probe_sink()),
            test_config(),
        );
        *conn.session_url.lock().await =
            Some(Url::parse(&format!("http://{}/session/abc", addr)).unwrap());

        conn.close().await;
        conn.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.phase(), TransportPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_close_without_session_url_sends_nothing() {
        let conn = WhepConnection::new("http://media.local/whep", Some(probe_sink()), test_config());
        // No handshake happened, so there is no session URL and no peer
        // connection; close must still succeed and settle the phase.
        conn.close().await;
        assert_eq!(conn.phase(), TransportPhase::Disconnected);
        assert!(conn.session_url.lock().await.is_none());
    }
}
