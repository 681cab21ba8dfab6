//! The task that owns a [`SessionMachine`].
//!
//! Everything that touches session state funnels through one `select!` loop:
//! application commands, transport events for the current connection, timer
//! firings and connect results. Effects requested by the machine are carried
//! out after every input, before the next one is taken.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::machine::{Effect, SessionMachine, TimerKind};
use super::state::SessionSnapshot;
use crate::core::protocol::ControlAction;
use crate::core::transport::{
    SharedTransport, TransportError, TransportEvent, TransportHandle, TransportResult,
};
use crate::errors::SessionResult;

/// Capacity of the application command channel.
pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the per-connection inbound event channel.
const TRANSPORT_EVENT_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<T>;

/// Requests from [`VoiceSession`](super::VoiceSession) handles.
pub(crate) enum Command {
    Open {
        endpoint: String,
        reply: Reply<SessionResult<()>>,
    },
    Close {
        reply: Reply<()>,
    },
    SendAudio {
        data: Bytes,
        reply: Reply<SessionResult<()>>,
    },
    SendText {
        text: String,
        reply: Reply<SessionResult<()>>,
    },
    SendControl {
        action: ControlAction,
        reply: Reply<SessionResult<()>>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown,
}

/// Inputs produced by tasks the driver spawned.
enum Internal {
    TimerFired {
        timer: TimerKind,
        epoch: u64,
    },
    ConnectFinished {
        epoch: u64,
        result: TransportResult<Box<dyn TransportHandle>>,
        events: mpsc::Receiver<TransportEvent>,
    },
}

struct Connection {
    handle: Box<dyn TransportHandle>,
    events: mpsc::Receiver<TransportEvent>,
}

pub(crate) struct SessionDriver {
    machine: SessionMachine,
    transport: SharedTransport,
    connect_timeout: Duration,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    connection: Option<Connection>,
    /// Timer and connect tasks belonging to `task_epoch`.
    tasks: Vec<JoinHandle<()>>,
    task_epoch: u64,
}

impl SessionDriver {
    pub(crate) fn new(
        machine: SessionMachine,
        transport: SharedTransport,
        connect_timeout: Duration,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let task_epoch = machine.epoch();
        Self {
            machine,
            transport,
            connect_timeout,
            commands,
            internal_tx,
            internal_rx,
            connection: None,
            tasks: Vec::new(),
            task_epoch,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(transport = self.transport.name(), "Session driver started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                event = next_transport_event(&mut self.connection) => {
                    self.handle_transport_event(event);
                }
            }
            self.run_effects();
        }

        self.machine.close();
        self.run_effects();
        self.abort_tasks();
        tracing::debug!("Session driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { endpoint, reply } => {
                let _ = reply.send(self.machine.open(&endpoint));
            }
            Command::Close { reply } => {
                self.machine.close();
                // Reply once the connection is actually gone.
                self.run_effects();
                let _ = reply.send(());
            }
            Command::SendAudio { data, reply } => {
                let _ = reply.send(self.machine.send_audio(data));
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.machine.send_text(&text));
            }
            Command::SendControl { action, reply } => {
                let _ = reply.send(self.machine.send_control(action));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.machine.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::TimerFired { timer, epoch } => {
                self.machine.on_timer(timer, epoch, Instant::now());
            }
            Internal::ConnectFinished {
                epoch,
                result,
                events,
            } => match result {
                Ok(mut handle) => {
                    if self.machine.on_connected(epoch, Instant::now()) {
                        self.connection = Some(Connection { handle, events });
                    } else {
                        handle.close();
                    }
                }
                Err(error) => self.machine.on_connect_failed(epoch, error),
            },
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.machine.on_frame(&frame, Instant::now()),
            other => {
                if let Some(error) = other.into_failure() {
                    self.machine.on_transport_failure(error);
                }
            }
        }
    }

    /// Carry out effects until the machine has nothing more to ask for.
    fn run_effects(&mut self) {
        loop {
            self.sync_task_epoch();
            let effects = self.machine.take_effects();
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                self.apply(effect);
            }
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect { endpoint, epoch } => self.spawn_connect(endpoint, epoch),
            Effect::Send(frame) => {
                let Some(connection) = self.connection.as_mut() else {
                    tracing::debug!("No connection, dropping outbound frame");
                    return;
                };
                if let Err(error) = connection.handle.send(frame) {
                    self.machine.on_transport_failure(error);
                }
            }
            Effect::Disconnect => {
                if let Some(mut connection) = self.connection.take() {
                    connection.handle.close();
                }
            }
            Effect::Schedule {
                timer,
                delay,
                epoch,
            } => {
                let tx = self.internal_tx.clone();
                self.tasks.push(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::TimerFired { timer, epoch });
                }));
            }
        }
    }

    fn spawn_connect(&mut self, endpoint: String, epoch: u64) {
        let transport = self.transport.clone();
        let tx = self.internal_tx.clone();
        let timeout = self.connect_timeout;

        self.tasks.push(tokio::spawn(async move {
            let (events_tx, events) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
            let result = match tokio::time::timeout(timeout, transport.open(&endpoint, events_tx))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(format!(
                    "connect to {endpoint} took longer than {}ms",
                    timeout.as_millis()
                ))),
            };
            let _ = tx.send(Internal::ConnectFinished {
                epoch,
                result,
                events,
            });
        }));
    }

    /// Abort timers and connect attempts that belong to an abandoned epoch.
    fn sync_task_epoch(&mut self) {
        let epoch = self.machine.epoch();
        if epoch != self.task_epoch {
            self.abort_tasks();
            self.task_epoch = epoch;
        } else {
            self.tasks.retain(|task| !task.is_finished());
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Next event from the current connection. Never resolves without one.
async fn next_transport_event(connection: &mut Option<Connection>) -> TransportEvent {
    match connection {
        Some(connection) => match connection.events.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed {
                code: 1006,
                reason: "connection dropped".to_string(),
            },
        },
        None => std::future::pending().await,
    }
}
