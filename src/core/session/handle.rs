use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::driver::{COMMAND_CHANNEL_CAPACITY, Command, SessionDriver};
use super::machine::SessionMachine;
use super::state::SessionSnapshot;
use crate::config::{SessionConfig, validate_session_config};
use crate::core::events::{EventBus, EventKind, SessionEvent, SubscriptionToken};
use crate::core::protocol::ControlAction;
use crate::core::transport::SharedTransport;
use crate::errors::{SessionError, SessionResult};
use crate::utils::validate_endpoint;

/// Application handle to a voice session.
///
/// All calls are forwarded to a driver task that owns the session state, so
/// they may be made from any task. Sends never wait on the network: they
/// return as soon as the driver has accepted or rejected them.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use waav_session::config::SessionConfig;
/// use waav_session::core::events::EventKind;
/// use waav_session::core::session::VoiceSession;
/// use waav_session::core::transport::WebSocketTransport;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let session = VoiceSession::new(SessionConfig::default(), Arc::new(WebSocketTransport::new()))?;
/// session.on(EventKind::Transcript, |event| {
///     println!("{event:?}");
///     Ok(())
/// });
/// session.open("wss://voice.example.com/v1/session").await?;
/// # Ok(())
/// # }
/// ```
pub struct VoiceSession {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    bus: Arc<EventBus>,
    driver: JoinHandle<()>,
}

impl VoiceSession {
    /// Create a session with its own event bus.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig, transport: SharedTransport) -> SessionResult<Self> {
        Self::with_bus(config, transport, Arc::new(EventBus::new()))
    }

    /// Create a session that publishes on an existing bus.
    pub fn with_bus(
        config: SessionConfig,
        transport: SharedTransport,
        bus: Arc<EventBus>,
    ) -> SessionResult<Self> {
        validate_session_config(&config)
            .map_err(|e| SessionError::InvalidConfiguration(e.to_string()))?;

        let session_id = Uuid::new_v4();
        let connect_timeout = config.connect_timeout();
        let machine = SessionMachine::new(config, bus.clone());
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let driver = SessionDriver::new(machine, transport, connect_timeout, command_rx);
        let span = tracing::info_span!("session", session_id = %session_id);
        let driver = tokio::spawn(driver.run().instrument(span));

        tracing::debug!(%session_id, "Voice session created");

        Ok(Self {
            session_id,
            commands,
            bus,
            driver,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The bus this session publishes on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Validate `endpoint` and start connecting.
    ///
    /// Returns once the connection attempt is under way; `SessionReady` is
    /// published when the handshake completes.
    pub async fn open(&self, endpoint: &str) -> SessionResult<()> {
        let url =
            validate_endpoint(endpoint).map_err(|e| SessionError::InvalidEndpoint(e.to_string()))?;
        self.request(|reply| Command::Open {
            endpoint: url.to_string(),
            reply,
        })
        .await?
    }

    /// Close the session and cancel any pending reconnect or keepalive.
    pub async fn close(&self) -> SessionResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Send an audio chunk.
    ///
    /// Fails with [`SessionError::QueueFull`] when the outbound queue is at
    /// capacity; wait for a `QueueDrained` event before retrying.
    pub async fn send_audio(&self, data: impl Into<Bytes>) -> SessionResult<()> {
        let data = data.into();
        self.request(|reply| Command::SendAudio { data, reply })
            .await?
    }

    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply })
            .await?
    }

    pub async fn send_control(&self, action: ControlAction) -> SessionResult<()> {
        self.request(|reply| Command::SendControl { action, reply })
            .await?
    }

    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Subscribe to one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe_all(handler)
    }

    pub fn off(&self, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(token)
    }

    /// Close the session and wait for the driver task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.driver.await {
            tracing::error!(session_id = %self.session_id, "Session driver failed: {}", e);
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::DriverStopped)?;
        response.await.map_err(|_| SessionError::DriverStopped)
    }
}
