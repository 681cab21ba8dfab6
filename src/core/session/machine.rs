//! The session state machine.
//!
//! [`SessionMachine`] owns the [`Session`] and is the only thing that mutates
//! it. It performs no I/O: every input (command, inbound frame, timer, connect
//! result) is a method call, and every side effect it wants is queued as an
//! [`Effect`] for the driver to carry out. Events are published on the bus
//! synchronously, before the input method returns.
//!
//! Connections and timers are tagged with an epoch. The epoch changes whenever
//! the current connection is abandoned (close, failure, re-open), so a timer
//! or connect result from an earlier connection is recognised and ignored.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::backoff::BackoffPolicy;
use super::state::{NegotiatedHandshake, Session, SessionSnapshot, SessionState, Speaker, Turn};
use super::watchdog::{Watchdog, WatchdogVerdict};
use crate::config::SessionConfig;
use crate::core::events::{EventBus, Party, SessionEvent};
use crate::core::protocol::{self, ControlAction, Message};
use crate::core::transport::TransportError;
use crate::errors::{CloseReason, ErrorKind, SessionError, SessionResult};

/// Timers the machine can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Reconnect,
    Watchdog,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a connection. Report the outcome with the same epoch.
    Connect { endpoint: String, epoch: u64 },
    /// Write one encoded frame to the current connection.
    Send(Bytes),
    /// Close the current connection, if any.
    Disconnect,
    /// Call `on_timer(timer, epoch)` after `delay`.
    Schedule {
        timer: TimerKind,
        delay: Duration,
        epoch: u64,
    },
}

pub struct SessionMachine {
    config: SessionConfig,
    backoff: BackoffPolicy,
    watchdog: Watchdog,
    bus: Arc<EventBus>,
    state: SessionState,
    session: Session,
    endpoint: Option<String>,
    epoch: u64,
    effects: Vec<Effect>,
}

impl SessionMachine {
    pub fn new(config: SessionConfig, bus: Arc<EventBus>) -> Self {
        Self {
            backoff: BackoffPolicy::from_config(&config),
            watchdog: Watchdog::new(config.ping_interval()),
            config,
            bus,
            state: SessionState::Idle,
            session: Session::default(),
            endpoint: None,
            epoch: 0,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            connection_status: self.state.connection_status(),
            turn: self.session.current_turn,
            queue_depth: self.session.outbound_audio_queue.len(),
            queue_drain_pending: self.session.queue_drain_pending,
            reconnect_attempt: self.session.reconnect_attempt,
            handshake: self.session.handshake,
            paused: self.session.paused,
        }
    }

    /// Hand over the effects queued so far.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Start connecting to `endpoint`. Allowed from `Idle` and `Closed`.
    pub fn open(&mut self, endpoint: &str) -> SessionResult<()> {
        match self.state {
            SessionState::Idle | SessionState::Closed => {}
            other => return Err(SessionError::AlreadyOpen(other)),
        }

        tracing::info!(endpoint, "Opening session");
        self.endpoint = Some(endpoint.to_string());
        self.session = Session::default();
        self.epoch += 1;
        self.transition(SessionState::Connecting);
        self.effects.push(Effect::Connect {
            endpoint: endpoint.to_string(),
            epoch: self.epoch,
        });
        Ok(())
    }

    /// Close the session from any state. Closing a closed session does nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::info!(state = %self.state, "Closing session");
        self.abandon_connection();
        self.enter_closed(CloseReason::Requested);
    }

    /// Send one audio chunk, subject to the outbound queue bound.
    pub fn send_audio(&mut self, data: Bytes) -> SessionResult<()> {
        self.require_active()?;

        if self.session.outbound_audio_queue.len() >= self.config.queue_max {
            tracing::debug!(capacity = self.config.queue_max, "Outbound audio queue full");
            return Err(SessionError::QueueFull {
                capacity: self.config.queue_max,
            });
        }

        self.effects
            .push(Effect::Send(protocol::encode(&Message::Audio(data.clone()))));
        self.session.outbound_audio_queue.push_back(data);
        self.session.queue_drain_pending = true;
        self.start_turn(Speaker::User);
        Ok(())
    }

    pub fn send_text(&mut self, text: &str) -> SessionResult<()> {
        self.require_active()?;
        self.effects
            .push(Effect::Send(protocol::encode(&Message::Text(text.to_string()))));
        Ok(())
    }

    /// Send a control code and apply its effect on the local turn state.
    pub fn send_control(&mut self, action: ControlAction) -> SessionResult<()> {
        self.require_active()?;
        self.effects
            .push(Effect::Send(protocol::encode(&Message::Control(action))));
        self.apply_control(action, Party::Local);
        Ok(())
    }

    fn require_active(&self) -> SessionResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(SessionError::NotActive(self.state))
        }
    }

    // =========================================================================
    // Transport inputs
    // =========================================================================

    /// A connection requested with `epoch` is up.
    ///
    /// Returns false when the connection is no longer wanted; the caller must
    /// close it.
    pub fn on_connected(&mut self, epoch: u64, now: Instant) -> bool {
        if epoch != self.epoch || self.state != SessionState::Connecting {
            tracing::debug!(epoch, current = self.epoch, "Discarding stale connection");
            return false;
        }

        self.session.last_activity_at = Some(now);
        self.transition(SessionState::HandshakePending);

        let handshake = Message::Handshake {
            version: self.config.offered_handshake_version(),
            model: self.config.handshake_model,
        };
        self.effects.push(Effect::Send(protocol::encode(&handshake)));
        // Also bounds how long we wait for the server handshake.
        self.schedule(TimerKind::Watchdog, self.watchdog.interval());
        true
    }

    /// A connection attempt requested with `epoch` failed.
    pub fn on_connect_failed(&mut self, epoch: u64, error: TransportError) {
        if epoch != self.epoch || self.state != SessionState::Connecting {
            tracing::debug!(epoch, %error, "Ignoring stale connect failure");
            return;
        }
        self.connection_lost(error);
    }

    /// The current connection failed or was closed by the peer.
    pub fn on_transport_failure(&mut self, error: TransportError) {
        if !self.state.is_connected_or_connecting() {
            tracing::debug!(state = %self.state, %error, "Ignoring transport failure");
            return;
        }
        self.connection_lost(error);
    }

    /// One inbound frame from the current connection.
    pub fn on_frame(&mut self, frame: &Bytes, now: Instant) {
        if !matches!(
            self.state,
            SessionState::HandshakePending | SessionState::Active
        ) {
            tracing::debug!(state = %self.state, "Dropping frame received outside a connection");
            return;
        }

        // Any frame counts as liveness, even one we end up discarding.
        self.session.last_activity_at = Some(now);

        let message = match protocol::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Protocol => {
                        tracing::error!(error = %e, "Protocol violation from peer");
                        self.publish_error(ErrorKind::Protocol, e.to_string());
                        self.connection_lost(TransportError::Io(format!(
                            "protocol violation: {e}"
                        )));
                    }
                    kind => {
                        tracing::warn!(error = %e, len = frame.len(), "Discarding malformed frame");
                        self.publish_error(kind, e.to_string());
                    }
                }
                return;
            }
        };

        tracing::debug!(kind = message.kind(), state = %self.state, "Inbound frame");

        if self.state == SessionState::HandshakePending {
            self.handle_pre_handshake(message);
        } else {
            self.handle_active(message);
        }
    }

    fn handle_pre_handshake(&mut self, message: Message) {
        match message {
            Message::Handshake { version, model } => {
                if self.config.supports_version(version) {
                    self.session.handshake = Some(NegotiatedHandshake { version, model });
                    self.session.reconnect_attempt = 0;
                    tracing::info!(version, model, "Handshake complete");
                    self.transition(SessionState::Active);
                    self.publish(SessionEvent::SessionReady { version, model });
                } else {
                    tracing::error!(
                        version,
                        supported = ?self.config.supported_handshake_versions,
                        "Server handshake version not supported"
                    );
                    self.publish_error(
                        ErrorKind::Protocol,
                        format!("unsupported handshake version {version}"),
                    );
                    self.abandon_connection();
                    self.enter_closed(CloseReason::ProtocolVersionMismatch { version });
                }
            }
            Message::Error(text) => self.publish_error(ErrorKind::Remote, text),
            Message::Ping => {}
            other => {
                tracing::warn!(kind = other.kind(), "Discarding frame received before handshake");
            }
        }
    }

    fn handle_active(&mut self, message: Message) {
        match message {
            Message::Handshake { version, .. } => {
                tracing::warn!(version, "Discarding duplicate handshake");
            }
            Message::Audio(data) => {
                self.start_turn(Speaker::Agent);
                self.publish(SessionEvent::AudioReceived { data });
            }
            Message::Text(text) => self.publish(SessionEvent::Transcript { text }),
            Message::Metadata(value) => self.publish(SessionEvent::Metadata { value }),
            Message::Control(action) => {
                self.publish(SessionEvent::ControlReceived { action });
                self.apply_control(action, Party::Remote);
            }
            Message::Error(text) => {
                tracing::warn!(error = %text, "Peer reported an error");
                self.publish_error(ErrorKind::Remote, text);
            }
            Message::Ping => {}
            Message::QueueDrained => {
                self.session.clear_queue();
                self.publish(SessionEvent::QueueDrained);
            }
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// A timer scheduled with `epoch` fired.
    pub fn on_timer(&mut self, timer: TimerKind, epoch: u64, now: Instant) {
        if epoch != self.epoch {
            tracing::trace!(?timer, epoch, current = self.epoch, "Ignoring stale timer");
            return;
        }

        match timer {
            TimerKind::Reconnect => {
                if !matches!(self.state, SessionState::Reconnecting(_)) {
                    return;
                }
                let Some(endpoint) = self.endpoint.clone() else {
                    return;
                };
                tracing::info!(attempt = self.session.reconnect_attempt, "Reconnecting");
                self.transition(SessionState::Connecting);
                self.effects.push(Effect::Connect {
                    endpoint,
                    epoch: self.epoch,
                });
            }
            TimerKind::Watchdog => self.watchdog_tick(now),
        }
    }

    fn watchdog_tick(&mut self, now: Instant) {
        if !matches!(
            self.state,
            SessionState::HandshakePending | SessionState::Active
        ) {
            return;
        }

        let last_activity = self.session.last_activity_at.unwrap_or(now);
        match self.watchdog.check(now, last_activity) {
            WatchdogVerdict::Stalled { silent_for } => {
                tracing::warn!(
                    silent_ms = silent_for.as_millis() as u64,
                    "No inbound activity, connection stalled"
                );
                self.connection_lost(TransportError::Stalled(silent_for.as_millis() as u64));
                return;
            }
            WatchdogVerdict::Ping if self.state.is_active() => {
                self.effects.push(Effect::Send(protocol::encode(&Message::Ping)));
                self.publish(SessionEvent::PingSent);
            }
            WatchdogVerdict::Ping | WatchdogVerdict::Healthy => {}
        }

        self.schedule(
            TimerKind::Watchdog,
            self.watchdog.next_check(now, last_activity),
        );
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Start a turn for `speaker` unless one is already in progress.
    fn start_turn(&mut self, speaker: Speaker) {
        if self.session.current_turn == Turn::Idle {
            self.session.current_turn = Turn::speaking(speaker);
            self.publish(SessionEvent::TurnStarted { speaker });
        }
    }

    fn apply_control(&mut self, action: ControlAction, by: Party) {
        match action {
            ControlAction::Start => {
                self.session.paused = false;
                let speaker = match by {
                    Party::Local => Speaker::User,
                    Party::Remote => Speaker::Agent,
                };
                self.start_turn(speaker);
            }
            ControlAction::EndTurn => match self.session.current_turn.speaker() {
                Some(speaker) => {
                    self.session.current_turn = Turn::Idle;
                    self.publish(SessionEvent::TurnEnded { speaker, by });
                }
                None => tracing::debug!(%by, "End of turn with no turn in progress"),
            },
            ControlAction::Pause => {
                self.session.paused = true;
            }
            ControlAction::Restart => {
                let discarded = self.session.outbound_audio_queue.len();
                self.session.current_turn = Turn::Idle;
                self.session.paused = false;
                self.session.clear_queue();
                tracing::info!(%by, discarded, "Session restarted");
            }
        }
    }

    /// Tear down the current connection and apply the reconnect policy.
    fn connection_lost(&mut self, error: TransportError) {
        tracing::error!(state = %self.state, %error, "Connection lost");
        self.publish_error(ErrorKind::Transport, error.to_string());
        self.abandon_connection();

        let attempts = self.session.reconnect_attempt;
        if !self.backoff.should_retry(attempts) {
            self.enter_closed(CloseReason::ReconnectExhausted { attempts });
            return;
        }

        let attempt = attempts + 1;
        let delay = self.backoff.delay_for(attempt);
        self.session.reconnect_attempt = attempt;
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.transition(SessionState::Reconnecting(attempt));
        self.publish(SessionEvent::Reconnecting { attempt, delay });
        self.schedule(TimerKind::Reconnect, delay);
    }

    /// Invalidate outstanding timers and connect attempts, and drop the
    /// connection and everything tied to it.
    fn abandon_connection(&mut self) {
        self.epoch += 1;
        self.effects.push(Effect::Disconnect);
        self.session.reset_connection();
    }

    fn enter_closed(&mut self, reason: CloseReason) {
        tracing::info!(%reason, "Session closed");
        self.transition(SessionState::Closed);
        self.publish(SessionEvent::SessionClosed { reason });
    }

    fn schedule(&mut self, timer: TimerKind, delay: Duration) {
        self.effects.push(Effect::Schedule {
            timer,
            delay,
            epoch: self.epoch,
        });
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        tracing::debug!(%from, %to, "State transition");
        self.state = to;
        self.publish(SessionEvent::StateChanged { from, to });
    }

    fn publish(&self, event: SessionEvent) {
        self.bus.publish(&event);
    }

    fn publish_error(&self, kind: ErrorKind, message: String) {
        self.publish(SessionEvent::SessionError { kind, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventKind;
    use parking_lot::Mutex;

    const ENDPOINT: &str = "ws://voice.test/session";

    struct Harness {
        machine: SessionMachine,
        events: Arc<Mutex<Vec<SessionEvent>>>,
        now: Instant,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let bus = Arc::new(EventBus::new());
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            bus.subscribe_all(move |event| {
                sink.lock().push(event.clone());
                Ok(())
            });
            Self {
                machine: SessionMachine::new(config, bus),
                events,
                now: Instant::now(),
            }
        }

        fn advance(&mut self, ms: u64) {
            self.now += Duration::from_millis(ms);
        }

        fn frame(&mut self, message: &Message) {
            let now = self.now;
            self.machine.on_frame(&protocol::encode(message), now);
        }

        /// Drive the machine to `Active` with a version-1 server handshake.
        fn activate(&mut self) {
            self.machine.open(ENDPOINT).unwrap();
            let epoch = self.machine.epoch();
            assert!(self.machine.on_connected(epoch, self.now));
            self.frame(&Message::Handshake {
                version: 1,
                model: 0,
            });
            assert_eq!(self.machine.state(), SessionState::Active);
            self.machine.take_effects();
            self.events.lock().clear();
        }

        fn count(&self, kind: EventKind) -> usize {
            self.events.lock().iter().filter(|e| e.kind() == kind).count()
        }

        fn sent(&mut self) -> Vec<Message> {
            self.machine
                .take_effects()
                .into_iter()
                .filter_map(|effect| match effect {
                    Effect::Send(frame) => protocol::decode(&frame).ok(),
                    _ => None,
                })
                .collect()
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            max_reconnect_attempts: 3,
            backoff_base_ms: 100,
            backoff_cap_ms: 1000,
            ping_interval_ms: 1000,
            queue_max: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_open_requests_connection() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();

        assert_eq!(h.machine.state(), SessionState::Connecting);
        assert_eq!(
            h.machine.take_effects(),
            vec![Effect::Connect {
                endpoint: ENDPOINT.to_string(),
                epoch: 1
            }]
        );
        assert!(matches!(
            h.machine.open(ENDPOINT),
            Err(SessionError::AlreadyOpen(SessionState::Connecting))
        ));
    }

    #[test]
    fn test_connected_sends_client_handshake() {
        let mut h = Harness::new(SessionConfig {
            handshake_model: 7,
            ..config()
        });
        h.machine.open(ENDPOINT).unwrap();
        h.machine.take_effects();

        assert!(h.machine.on_connected(1, h.now));
        assert_eq!(h.machine.state(), SessionState::HandshakePending);
        let effects = h.machine.take_effects();
        assert_eq!(
            effects[0],
            Effect::Send(protocol::encode(&Message::Handshake {
                version: 1,
                model: 7
            }))
        );
        assert!(effects.contains(&Effect::Schedule {
            timer: TimerKind::Watchdog,
            delay: Duration::from_millis(1000),
            epoch: 1
        }));
    }

    #[test]
    fn test_supported_handshake_activates_once() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();
        h.machine.on_connected(1, h.now);
        h.frame(&Message::Handshake {
            version: 1,
            model: 0,
        });

        assert_eq!(h.machine.state(), SessionState::Active);
        assert_eq!(h.count(EventKind::SessionReady), 1);
        assert_eq!(
            h.machine.snapshot().handshake,
            Some(NegotiatedHandshake {
                version: 1,
                model: 0
            })
        );

        // A second handshake is discarded.
        h.frame(&Message::Handshake {
            version: 1,
            model: 0,
        });
        assert_eq!(h.count(EventKind::SessionReady), 1);
        assert_eq!(h.machine.state(), SessionState::Active);
    }

    #[test]
    fn test_unsupported_handshake_closes_without_retry() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();
        h.machine.on_connected(1, h.now);
        h.machine.take_effects();
        h.frame(&Message::Handshake {
            version: 9,
            model: 0,
        });

        assert_eq!(h.machine.state(), SessionState::Closed);
        assert!(h.events.lock().contains(&SessionEvent::SessionClosed {
            reason: CloseReason::ProtocolVersionMismatch { version: 9 }
        }));
        let effects = h.machine.take_effects();
        assert!(effects.contains(&Effect::Disconnect));
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::Schedule { .. } | Effect::Connect { .. }))
        );
    }

    #[test]
    fn test_frames_before_handshake_are_discarded() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();
        h.machine.on_connected(1, h.now);

        h.frame(&Message::Audio(Bytes::from_static(b"early")));
        h.frame(&Message::Text("early".into()));

        assert_eq!(h.machine.state(), SessionState::HandshakePending);
        assert_eq!(h.count(EventKind::AudioReceived), 0);
        assert_eq!(h.count(EventKind::TurnStarted), 0);
        assert_eq!(h.machine.session().current_turn, Turn::Idle);
    }

    #[test]
    fn test_sends_require_active() {
        let mut h = Harness::new(config());
        assert!(matches!(
            h.machine.send_audio(Bytes::from_static(b"x")),
            Err(SessionError::NotActive(SessionState::Idle))
        ));
        h.machine.open(ENDPOINT).unwrap();
        assert!(matches!(
            h.machine.send_text("hi"),
            Err(SessionError::NotActive(SessionState::Connecting))
        ));
        assert!(h.machine.send_control(ControlAction::Start).is_err());
    }

    #[test]
    fn test_queue_bound() {
        let mut h = Harness::new(config());
        h.activate();

        for _ in 0..4 {
            h.machine.send_audio(Bytes::from_static(b"pcm")).unwrap();
        }
        let err = h.machine.send_audio(Bytes::from_static(b"pcm")).unwrap_err();
        assert!(matches!(err, SessionError::QueueFull { capacity: 4 }));
        assert_eq!(err.kind(), ErrorKind::Backpressure);
        assert_eq!(h.machine.session().outbound_audio_queue.len(), 4);
        assert_eq!(h.sent().len(), 4);
    }

    #[test]
    fn test_queue_drained_releases_queue_idempotently() {
        let mut h = Harness::new(config());
        h.activate();

        for _ in 0..4 {
            h.machine.send_audio(Bytes::from_static(b"pcm")).unwrap();
        }
        assert!(h.machine.session().queue_drain_pending);

        h.frame(&Message::QueueDrained);
        assert!(h.machine.session().outbound_audio_queue.is_empty());
        assert!(!h.machine.session().queue_drain_pending);

        let before = h.machine.snapshot();
        h.frame(&Message::QueueDrained);
        assert_eq!(h.machine.snapshot(), before);
        assert_eq!(h.count(EventKind::QueueDrained), 2);

        assert!(h.machine.send_audio(Bytes::from_static(b"pcm")).is_ok());
    }

    #[test]
    fn test_audio_starts_turns() {
        let mut h = Harness::new(config());
        h.activate();

        h.frame(&Message::Audio(Bytes::from_static(b"agent")));
        assert_eq!(h.machine.session().current_turn, Turn::AgentSpeaking);
        assert!(h.events.lock().contains(&SessionEvent::TurnStarted {
            speaker: Speaker::Agent
        }));

        // Outbound audio does not steal the turn.
        h.machine.send_audio(Bytes::from_static(b"user")).unwrap();
        assert_eq!(h.machine.session().current_turn, Turn::AgentSpeaking);
    }

    #[test]
    fn test_end_turn_from_remote() {
        let mut h = Harness::new(config());
        h.activate();
        h.machine.send_audio(Bytes::from_static(b"user")).unwrap();
        assert_eq!(h.machine.session().current_turn, Turn::UserSpeaking);

        h.frame(&Message::Control(ControlAction::EndTurn));
        assert_eq!(h.machine.session().current_turn, Turn::Idle);
        assert!(h.events.lock().contains(&SessionEvent::TurnEnded {
            speaker: Speaker::User,
            by: Party::Remote
        }));

        // No turn in progress: nothing to end.
        h.frame(&Message::Control(ControlAction::EndTurn));
        assert_eq!(h.count(EventKind::TurnEnded), 1);
    }

    #[test]
    fn test_local_restart_clears_queue_and_turn() {
        let mut h = Harness::new(config());
        h.activate();
        h.frame(&Message::Audio(Bytes::from_static(b"agent")));
        for _ in 0..3 {
            h.machine.send_audio(Bytes::from_static(b"pcm")).unwrap();
        }
        assert_eq!(h.machine.session().outbound_audio_queue.len(), 3);
        h.machine.take_effects();

        h.machine.send_control(ControlAction::Restart).unwrap();

        assert_eq!(h.machine.session().outbound_audio_queue.len(), 0);
        assert!(!h.machine.session().queue_drain_pending);
        assert_eq!(h.machine.session().current_turn, Turn::Idle);
        assert_eq!(h.sent(), vec![Message::Control(ControlAction::Restart)]);
    }

    #[test]
    fn test_remote_restart_and_pause() {
        let mut h = Harness::new(config());
        h.activate();
        h.machine.send_audio(Bytes::from_static(b"pcm")).unwrap();

        h.frame(&Message::Control(ControlAction::Pause));
        assert!(h.machine.snapshot().paused);
        assert_eq!(h.machine.session().current_turn, Turn::UserSpeaking);

        h.frame(&Message::Control(ControlAction::Restart));
        let snapshot = h.machine.snapshot();
        assert!(!snapshot.paused);
        assert_eq!(snapshot.turn, Turn::Idle);
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(h.count(EventKind::ControlReceived), 2);
    }

    #[test]
    fn test_inbound_payload_events() {
        let mut h = Harness::new(config());
        h.activate();

        h.frame(&Message::Text("hello".into()));
        h.frame(&Message::Metadata(serde_json::json!({"widget": "chart"})));
        h.frame(&Message::Error("overloaded".into()));

        let events = h.events.lock().clone();
        assert!(events.contains(&SessionEvent::Transcript {
            text: "hello".into()
        }));
        assert!(events.contains(&SessionEvent::Metadata {
            value: serde_json::json!({"widget": "chart"})
        }));
        assert!(events.contains(&SessionEvent::SessionError {
            kind: ErrorKind::Remote,
            message: "overloaded".into()
        }));
        assert_eq!(h.machine.state(), SessionState::Active);
    }

    #[test]
    fn test_malformed_frame_is_reported_and_skipped() {
        let mut h = Harness::new(config());
        h.activate();

        let now = h.now;
        h.machine.on_frame(&Bytes::from_static(&[0x02, 0xff, 0xfe]), now);
        h.machine.on_frame(&Bytes::from_static(&[0x42]), now);

        assert_eq!(h.machine.state(), SessionState::Active);
        let errors: Vec<_> = h
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::SessionError { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![ErrorKind::MalformedFrame, ErrorKind::MalformedFrame]);
    }

    #[test]
    fn test_unknown_control_byte_triggers_reconnect() {
        let mut h = Harness::new(config());
        h.activate();

        let now = h.now;
        h.machine.on_frame(&Bytes::from_static(&[0x03, 0x09]), now);

        assert_eq!(h.machine.state(), SessionState::Reconnecting(1));
        assert!(h.events.lock().iter().any(|e| matches!(
            e,
            SessionEvent::SessionError {
                kind: ErrorKind::Protocol,
                ..
            }
        )));
    }

    #[test]
    fn test_send_failure_schedules_reconnect() {
        let mut h = Harness::new(config());
        h.activate();

        h.machine
            .on_transport_failure(TransportError::SendFailed("broken pipe".into()));

        assert_eq!(h.machine.state(), SessionState::Reconnecting(1));
        let effects = h.machine.take_effects();
        assert!(effects.contains(&Effect::Disconnect));
        assert!(effects.contains(&Effect::Schedule {
            timer: TimerKind::Reconnect,
            delay: Duration::from_millis(100),
            epoch: h.machine.epoch()
        }));
    }

    #[test]
    fn test_reconnect_cycle_and_reset_on_success() {
        let mut h = Harness::new(config());
        h.activate();

        h.machine
            .on_transport_failure(TransportError::RemoteClosed {
                code: 1006,
                reason: String::new(),
            });
        let epoch = h.machine.epoch();
        h.machine.take_effects();

        let now = h.now;
        h.machine.on_timer(TimerKind::Reconnect, epoch, now);
        assert_eq!(h.machine.state(), SessionState::Connecting);
        assert_eq!(
            h.machine.take_effects(),
            vec![Effect::Connect {
                endpoint: ENDPOINT.to_string(),
                epoch
            }]
        );

        h.machine
            .on_connect_failed(epoch, TransportError::ConnectFailed("refused".into()));
        assert_eq!(h.machine.state(), SessionState::Reconnecting(2));
        assert!(h.events.lock().contains(&SessionEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(200)
        }));

        let epoch = h.machine.epoch();
        h.machine.on_timer(TimerKind::Reconnect, epoch, now);
        assert!(h.machine.on_connected(epoch, now));
        h.frame(&Message::Handshake {
            version: 1,
            model: 0,
        });
        assert_eq!(h.machine.state(), SessionState::Active);
        assert_eq!(h.machine.snapshot().reconnect_attempt, 0);
    }

    #[test]
    fn test_reconnect_exhausted() {
        let mut h = Harness::new(SessionConfig {
            max_reconnect_attempts: 1,
            ..config()
        });
        h.activate();

        h.machine.on_transport_failure(TransportError::Io("reset".into()));
        assert_eq!(h.machine.state(), SessionState::Reconnecting(1));

        let epoch = h.machine.epoch();
        let now = h.now;
        h.machine.on_timer(TimerKind::Reconnect, epoch, now);
        h.machine
            .on_connect_failed(epoch, TransportError::ConnectFailed("refused".into()));

        assert_eq!(h.machine.state(), SessionState::Closed);
        assert!(h.events.lock().contains(&SessionEvent::SessionClosed {
            reason: CloseReason::ReconnectExhausted { attempts: 1 }
        }));
    }

    #[test]
    fn test_close_invalidates_timers() {
        let mut h = Harness::new(config());
        h.activate();
        h.machine.on_transport_failure(TransportError::Io("reset".into()));
        let reconnect_epoch = h.machine.epoch();

        h.machine.close();
        assert_eq!(h.machine.state(), SessionState::Closed);
        h.machine.take_effects();

        let now = h.now;
        h.machine
            .on_timer(TimerKind::Reconnect, reconnect_epoch, now);
        h.machine.on_timer(TimerKind::Watchdog, reconnect_epoch, now);
        assert_eq!(h.machine.state(), SessionState::Closed);
        assert!(h.machine.take_effects().is_empty());
        assert!(!h.machine.on_connected(reconnect_epoch, now));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut h = Harness::new(config());
        h.activate();
        h.machine.close();
        h.machine.close();
        assert_eq!(h.count(EventKind::SessionClosed), 1);
        assert!(h.events.lock().contains(&SessionEvent::SessionClosed {
            reason: CloseReason::Requested
        }));

        // Re-open after close starts over.
        h.machine.open(ENDPOINT).unwrap();
        assert_eq!(h.machine.state(), SessionState::Connecting);
    }

    #[test]
    fn test_close_from_idle() {
        let mut h = Harness::new(config());
        h.machine.close();
        assert_eq!(h.machine.state(), SessionState::Closed);
        assert_eq!(h.count(EventKind::SessionClosed), 1);
    }

    #[test]
    fn test_watchdog_pings_then_declares_stall() {
        let mut h = Harness::new(config());
        h.activate();
        let epoch = h.machine.epoch();

        h.advance(1000);
        let now = h.now;
        h.machine.on_timer(TimerKind::Watchdog, epoch, now);
        assert_eq!(h.sent(), vec![Message::Ping]);
        assert_eq!(h.count(EventKind::PingSent), 1);

        h.advance(1000);
        let now = h.now;
        h.machine.on_timer(TimerKind::Watchdog, epoch, now);
        assert_eq!(h.machine.state(), SessionState::Reconnecting(1));
    }

    #[test]
    fn test_watchdog_activity_keeps_session_alive() {
        let mut h = Harness::new(config());
        h.activate();
        let epoch = h.machine.epoch();

        for _ in 0..5 {
            h.advance(900);
            h.frame(&Message::Ping);
            h.advance(100);
            let now = h.now;
            h.machine.on_timer(TimerKind::Watchdog, epoch, now);
        }
        assert_eq!(h.machine.state(), SessionState::Active);
        assert_eq!(h.count(EventKind::PingSent), 0);
    }

    #[test]
    fn test_watchdog_bounds_handshake_wait() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();
        h.machine.on_connected(1, h.now);
        h.machine.take_effects();

        h.advance(1000);
        let now = h.now;
        h.machine.on_timer(TimerKind::Watchdog, 1, now);
        assert_eq!(h.machine.state(), SessionState::HandshakePending);
        assert!(h.sent().is_empty());

        h.advance(1000);
        let now = h.now;
        h.machine.on_timer(TimerKind::Watchdog, 1, now);
        assert_eq!(h.machine.state(), SessionState::Reconnecting(1));
    }

    fn watchdog_delay(effects: &[Effect]) -> Duration {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Schedule {
                    timer: TimerKind::Watchdog,
                    delay,
                    ..
                } => Some(*delay),
                _ => None,
            })
            .expect("watchdog not rescheduled")
    }

    #[test]
    fn test_watchdog_deadlines_follow_last_activity() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();
        h.machine.on_connected(1, h.now);
        let mut delay = watchdog_delay(&h.machine.take_effects());

        // Handshake lands 50ms after the connection, then silence.
        h.advance(50);
        h.frame(&Message::Handshake {
            version: 1,
            model: 0,
        });
        h.machine.take_effects();
        let last_activity = h.now;
        let connected_at = last_activity - Duration::from_millis(50);
        let mut at = connected_at;
        let mut ping_at = None;

        while h.machine.state() == SessionState::Active {
            at += delay;
            h.now = at;
            h.machine.on_timer(TimerKind::Watchdog, 1, at);
            let effects = h.machine.take_effects();
            if ping_at.is_none() && h.count(EventKind::PingSent) == 1 {
                ping_at = Some(at);
            }
            if h.machine.state() == SessionState::Active {
                delay = watchdog_delay(&effects);
            }
        }

        assert_eq!(h.machine.state(), SessionState::Reconnecting(1));
        assert_eq!(ping_at, Some(last_activity + Duration::from_millis(1000)));
        assert_eq!(at, last_activity + Duration::from_millis(2000));
        assert_eq!(h.count(EventKind::PingSent), 1);
    }

    #[test]
    fn test_state_changes_are_published_in_order() {
        let mut h = Harness::new(config());
        h.machine.open(ENDPOINT).unwrap();
        h.machine.on_connected(1, h.now);
        h.frame(&Message::Handshake {
            version: 1,
            model: 0,
        });

        let kinds: Vec<EventKind> = h.events.lock().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StateChanged,
                EventKind::StateChanged,
                EventKind::StateChanged,
                EventKind::SessionReady
            ]
        );
    }
}
