//! Ticket lifecycle controller
//!
//! One task per session owns the [`PlayerState`] and processes commands,
//! timer firings and network completions strictly in arrival order, so a
//! session's transitions are serializable even while several async
//! operations are in flight.
//!
//! Every operation is launched under the session's current epoch; `start`,
//! `disconnect` and `reset` bump the epoch, and a completion whose epoch is
//! stale is discarded without touching state. This is what makes
//! overlapping start/disconnect/start sequences safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::api::{Ticket, TicketIssuer};
use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::events::{EventBus, PlayerEvent};

use super::machine::{reduce, PlayerState, PlayerStatus, SessionEvent};
use super::timers::{TimerKind, TimerSet};

/// Message processed by the session task, one at a time
enum SessionMsg {
    Command(Command),
    /// Timer firing or network completion, tagged with the epoch it was
    /// launched under
    Completion { epoch: u64, done: Completion },
}

enum Command {
    Start { stream_id: String },
    Play,
    Pause,
    Disconnect,
    Reset,
    Shutdown,
}

enum Completion {
    TicketIssued(Result<Ticket>),
    TicketRefreshed(Result<Ticket>),
    RefreshDue,
    HardExpired,
    ReconnectDue,
}

/// Handle to a running player session
///
/// Commands are queued and applied by the session task; observe progress
/// through [`PlayerSession::watch_state`] or [`PlayerSession::subscribe`].
pub struct PlayerSession {
    tx: mpsc::UnboundedSender<SessionMsg>,
    state_rx: watch::Receiver<PlayerState>,
    events: Arc<EventBus>,
}

impl PlayerSession {
    /// Spawn a session task backed by `issuer`
    pub fn spawn(issuer: Arc<dyn TicketIssuer>, config: PlayerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlayerState::Idle);
        let events = Arc::new(EventBus::new());

        let task = SessionTask {
            issuer,
            config,
            state: PlayerState::Idle,
            epoch: 0,
            attempt: 0,
            resume_playing: false,
            timers: TimerSet::new(),
            tx: tx.clone(),
            state_tx,
            events: events.clone(),
        };
        tokio::spawn(task.run(rx));

        Self {
            tx,
            state_rx,
            events,
        }
    }

    /// Begin playback of `stream_id`, superseding any prior session work
    pub fn start(&self, stream_id: impl Into<String>) {
        self.send(Command::Start {
            stream_id: stream_id.into(),
        });
    }

    /// Valid from `ready` or `paused`; a no-op otherwise
    pub fn play(&self) {
        self.send(Command::Play);
    }

    /// Valid from `playing`; a no-op otherwise
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Stop the session, keeping the stream id for diagnostics
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Stop the session and discard all session data
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Current state snapshot
    pub fn state(&self) -> PlayerState {
        self.state_rx.borrow().clone()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<PlayerState> {
        self.state_rx.clone()
    }

    /// Subscribe to discrete player events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) {
        let _ = self.tx.send(SessionMsg::Command(command));
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        let _ = self.tx.send(SessionMsg::Command(Command::Shutdown));
    }
}

struct SessionTask {
    issuer: Arc<dyn TicketIssuer>,
    config: PlayerConfig,
    state: PlayerState,
    /// Generation counter; completions from older epochs are stale
    epoch: u64,
    /// Reconnect round for the next failure, reset on success
    attempt: u32,
    /// Whether the refresh in flight should resume playback on success
    resume_playing: bool,
    timers: TimerSet,
    tx: mpsc::UnboundedSender<SessionMsg>,
    state_tx: watch::Sender<PlayerState>,
    events: Arc<EventBus>,
}

impl SessionTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                SessionMsg::Command(Command::Shutdown) => break,
                SessionMsg::Command(command) => self.handle_command(command),
                SessionMsg::Completion { epoch, done } => {
                    if epoch != self.epoch {
                        debug!(stale = epoch, current = self.epoch, "stale completion discarded");
                        continue;
                    }
                    self.handle_completion(done);
                }
            }
        }
        self.timers.clear_all();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { stream_id } => {
                self.attempt = 0;
                self.begin_start(stream_id);
            }
            Command::Play => self.apply(SessionEvent::Play),
            Command::Pause => self.apply(SessionEvent::Pause),
            Command::Disconnect => {
                self.epoch += 1;
                self.timers.clear_all();
                self.apply(SessionEvent::Disconnect);
            }
            Command::Reset => {
                self.epoch += 1;
                self.timers.clear_all();
                self.apply(SessionEvent::Reset);
            }
            Command::Shutdown => unreachable!("handled in run"),
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::TicketIssued(Ok(ticket)) => {
                self.attempt = 0;
                info!(stream = %ticket.stream_id, expires = %ticket.expires_at, "ticket issued");
                self.events.publish(PlayerEvent::TicketIssued {
                    stream_id: ticket.stream_id.clone(),
                    expires_at: ticket.expires_at,
                });
                self.apply(SessionEvent::TicketOk {
                    ticket: ticket.clone(),
                });
                self.schedule_ticket_timers(&ticket);
                if self.config.auto_play {
                    self.apply(SessionEvent::Play);
                }
            }
            Completion::TicketIssued(Err(e)) => {
                let stream_id = self.current_stream_id();
                warn!(stream = %stream_id, error = %e, "ticket issuance failed");
                self.fail(stream_id, e, false);
            }
            Completion::RefreshDue => {
                let Some(ticket) = self.state.ticket().cloned() else {
                    return;
                };
                // The hard-expiry timer stays armed: it is the safety net
                // in case this renewal stalls.
                self.timers.clear(TimerKind::Refresh);
                self.resume_playing = self.state.status() == PlayerStatus::Playing;
                self.apply(SessionEvent::RefreshBegin);
                self.spawn_issuance(ticket.stream_id, true);
            }
            Completion::TicketRefreshed(Ok(ticket)) => {
                let old_url = self.state.ticket().map(|t| t.whep_url.clone());
                self.attempt = 0;
                info!(stream = %ticket.stream_id, expires = %ticket.expires_at, "ticket renewed");
                self.events.publish(PlayerEvent::TicketRenewed {
                    stream_id: ticket.stream_id.clone(),
                    expires_at: ticket.expires_at,
                });
                if old_url.as_deref() != Some(ticket.whep_url.as_str()) {
                    warn!(stream = %ticket.stream_id, url = %ticket.whep_url, "playback endpoint changed on renewal");
                    self.events.publish(PlayerEvent::EndpointChanged {
                        stream_id: ticket.stream_id.clone(),
                        whep_url: ticket.whep_url.clone(),
                    });
                }
                self.apply(SessionEvent::RefreshOk {
                    ticket: ticket.clone(),
                    keep_playing: self.resume_playing,
                });
                self.schedule_ticket_timers(&ticket);
            }
            Completion::TicketRefreshed(Err(e)) => {
                let stream_id = self.current_stream_id();
                warn!(stream = %stream_id, error = %e, "ticket renewal failed");
                self.fail(stream_id, e, true);
            }
            Completion::HardExpired => {
                if !self.state.has_ticket() {
                    return;
                }
                let stream_id = self.current_stream_id();
                warn!(stream = %stream_id, "ticket hard-expired");
                self.fail(
                    stream_id,
                    PlayerError::TicketExpired("ticket hard-expired".to_string()),
                    true,
                );
            }
            Completion::ReconnectDue => {
                let PlayerState::Reconnecting {
                    stream_id,
                    last_error,
                    ..
                } = self.state.clone()
                else {
                    return;
                };
                self.apply(SessionEvent::ReconnectScheduled {
                    stream_id: stream_id.clone(),
                    attempt: self.attempt,
                    last_error,
                });
                // Retries re-enter through start: a reconnect implies the
                // prior credential may itself be invalid.
                self.begin_start(stream_id);
            }
        }
    }

    /// Shared entry for user-initiated start and reconnect retries.
    /// Does not touch the attempt counter.
    fn begin_start(&mut self, stream_id: String) {
        self.epoch += 1;
        self.timers.clear_all();
        self.apply(SessionEvent::Start {
            stream_id: stream_id.clone(),
        });
        self.spawn_issuance(stream_id, false);
    }

    fn spawn_issuance(&self, stream_id: String, refresh: bool) {
        let issuer = self.issuer.clone();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = issuer.issue(&stream_id).await;
            let done = if refresh {
                Completion::TicketRefreshed(result)
            } else {
                Completion::TicketIssued(result)
            };
            let _ = tx.send(SessionMsg::Completion { epoch, done });
        });
    }

    /// Arm the renewal and hard-expiry timers for a newly current ticket.
    /// An already expired ticket raises an immediate refresh failure
    /// instead of arming anything.
    fn schedule_ticket_timers(&mut self, ticket: &Ticket) {
        self.timers.clear_all();

        let ttl = match ticket.ttl_from(Utc::now()).to_std() {
            Ok(ttl) => ttl,
            Err(_) => {
                self.fail(
                    ticket.stream_id.clone(),
                    PlayerError::TicketExpired("expired before refresh".to_string()),
                    true,
                );
                return;
            }
        };

        let lead = Duration::from_secs(rand::thread_rng().gen_range(
            self.config.refresh_lead_min_secs..=self.config.refresh_lead_max_secs,
        ));
        let refresh_in = ttl.saturating_sub(lead);
        debug!(
            stream = %ticket.stream_id,
            ttl_secs = ttl.as_secs(),
            refresh_in_secs = refresh_in.as_secs(),
            "renewal scheduled"
        );

        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.timers.arm(
            TimerKind::Refresh,
            tokio::spawn(async move {
                tokio::time::sleep(refresh_in).await;
                let _ = tx.send(SessionMsg::Completion {
                    epoch,
                    done: Completion::RefreshDue,
                });
            }),
        );

        let tx = self.tx.clone();
        self.timers.arm(
            TimerKind::HardExpire,
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                let _ = tx.send(SessionMsg::Completion {
                    epoch,
                    done: Completion::HardExpired,
                });
            }),
        );
    }

    /// Route a failure into the reconnect-with-backoff path
    fn fail(&mut self, stream_id: String, error: PlayerError, refresh: bool) {
        self.timers.clear_all();
        let attempt = self.attempt;
        let message = error.to_string();
        let event = if refresh {
            SessionEvent::RefreshFail {
                stream_id,
                attempt,
                message,
            }
        } else {
            SessionEvent::TicketFail {
                stream_id,
                attempt,
                message,
            }
        };
        self.apply(event);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let PlayerState::Reconnecting {
            stream_id,
            attempt,
            last_error,
        } = self.state.clone()
        else {
            return;
        };

        if attempt >= self.config.max_reconnect_attempts {
            let error = PlayerError::ReconnectExhausted(
                last_error.unwrap_or_else(|| "reconnect failed".to_string()),
            );
            let message = error.to_string();
            warn!(stream = %stream_id, attempt, error = %error, "giving up reconnection");
            self.events.publish(PlayerEvent::ReconnectGaveUp {
                stream_id: stream_id.clone(),
                message: message.clone(),
            });
            self.apply(SessionEvent::ReconnectGiveUp { stream_id, message });
            return;
        }

        let delay = Duration::from_secs(
            2u64.saturating_pow(attempt).min(self.config.backoff_cap_secs),
        );
        info!(stream = %stream_id, attempt, delay_secs = delay.as_secs(), "reconnect scheduled");
        self.events.publish(PlayerEvent::ReconnectScheduled {
            stream_id,
            attempt,
            delay,
        });

        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.timers.arm(
            TimerKind::Reconnect,
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(SessionMsg::Completion {
                    epoch,
                    done: Completion::ReconnectDue,
                });
            }),
        );
        self.attempt = attempt + 1;
    }

    fn current_stream_id(&self) -> String {
        self.state
            .stream_id()
            .map(str::to_owned)
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn apply(&mut self, event: SessionEvent) {
        let prev = self.state.status();
        self.state = reduce(self.state.clone(), event);
        let status = self.state.status();
        if status != prev {
            debug!(%status, stream = ?self.state.stream_id(), "session status");
            self.events.publish(PlayerEvent::StatusChanged {
                stream_id: self.state.stream_id().map(str::to_owned),
                status,
            });
        }
        let _ = self.state_tx.send(self.state.clone());
    }
}
