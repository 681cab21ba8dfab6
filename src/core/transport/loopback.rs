//! In-process transport.
//!
//! [`LoopbackTransport`] hands frames to a [`RemotePeer`] controller instead of
//! a socket. The peer plays the server: it injects inbound frames, observes
//! what the session sent, and can refuse, stall or drop connections.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::base::{Transport, TransportError, TransportEvent, TransportHandle, TransportResult};
use crate::core::protocol::{self, Message};

#[derive(Default)]
struct PeerState {
    next_connection_id: u64,
    current: Option<(u64, mpsc::Sender<TransportEvent>)>,
    endpoints: Vec<String>,
    refuse_connects: usize,
    hang_connects: usize,
    fail_sends: bool,
    sent: Vec<Bytes>,
}

struct Shared {
    state: Mutex<PeerState>,
    connections: watch::Sender<usize>,
    sent_count: watch::Sender<usize>,
}

/// Transport side of the loopback pair.
#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

/// Server side of the loopback pair.
#[derive(Clone)]
pub struct RemotePeer {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (LoopbackTransport, RemotePeer) {
        let shared = Arc::new(Shared {
            state: Mutex::new(PeerState::default()),
            connections: watch::channel(0).0,
            sent_count: watch::channel(0).0,
        });
        (
            LoopbackTransport {
                shared: shared.clone(),
            },
            RemotePeer { shared },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(
        &self,
        endpoint: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<Box<dyn TransportHandle>> {
        let hang = {
            let mut state = self.shared.state.lock();
            state.endpoints.push(endpoint.to_string());
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(TransportError::ConnectFailed(
                    "loopback peer refused connection".to_string(),
                ));
            }
            if state.hang_connects > 0 {
                state.hang_connects -= 1;
                true
            } else {
                false
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let id = {
            let mut state = self.shared.state.lock();
            state.next_connection_id += 1;
            let id = state.next_connection_id;
            state.current = Some((id, events));
            id
        };
        self.shared.connections.send_modify(|count| *count += 1);

        Ok(Box::new(LoopbackHandle {
            id,
            shared: self.shared.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

struct LoopbackHandle {
    id: u64,
    shared: Arc<Shared>,
}

impl TransportHandle for LoopbackHandle {
    fn send(&mut self, frame: Bytes) -> TransportResult<()> {
        {
            let mut state = self.shared.state.lock();
            if state.fail_sends {
                return Err(TransportError::SendFailed(
                    "loopback peer rejected frame".to_string(),
                ));
            }
            if !matches!(state.current, Some((id, _)) if id == self.id) {
                return Err(TransportError::SendFailed("connection closed".to_string()));
            }
            state.sent.push(frame);
        }
        self.shared.sent_count.send_modify(|count| *count += 1);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if matches!(state.current, Some((id, _)) if id == self.id) {
            state.current = None;
        }
    }
}

impl RemotePeer {
    fn current_sender(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.shared
            .state
            .lock()
            .current
            .as_ref()
            .map(|(_, tx)| tx.clone())
    }

    /// Deliver a raw inbound frame. Returns false when nothing is connected.
    pub async fn push(&self, frame: Bytes) -> bool {
        match self.current_sender() {
            Some(tx) => tx.send(TransportEvent::Frame(frame)).await.is_ok(),
            None => false,
        }
    }

    /// Encode and deliver an inbound message.
    pub async fn push_message(&self, message: &Message) -> bool {
        self.push(protocol::encode(message)).await
    }

    /// Close the current connection from the remote side.
    pub async fn close_connection(&self, code: u16, reason: &str) {
        let sender = self.shared.state.lock().current.take().map(|(_, tx)| tx);
        if let Some(tx) = sender {
            let _ = tx
                .send(TransportEvent::Closed {
                    code,
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Fail the current connection with a transport error.
    pub async fn fail_connection(&self, message: &str) {
        let sender = self.shared.state.lock().current.take().map(|(_, tx)| tx);
        if let Some(tx) = sender {
            let _ = tx.send(TransportEvent::Error(message.to_string())).await;
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: usize) {
        self.shared.state.lock().refuse_connects = count;
    }

    /// Never complete the next `count` connection attempts.
    pub fn hang_next_connects(&self, count: usize) {
        self.shared.state.lock().hang_connects = count;
    }

    /// Make every send fail until reset.
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.state.lock().fail_sends = fail;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().current.is_some()
    }

    /// Endpoints of every connection attempt, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.shared.state.lock().endpoints.clone()
    }

    /// Number of connection attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.shared.state.lock().endpoints.len()
    }

    /// Every frame the session has sent, across connections.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.shared.state.lock().sent.clone()
    }

    /// Sent frames decoded; undecodable frames are skipped.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent_frames()
            .iter()
            .filter_map(|frame| protocol::decode(frame).ok())
            .collect()
    }

    /// Wait until at least `count` connections have been established.
    pub async fn wait_for_connections(&self, count: usize) {
        let mut rx = self.shared.connections.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// Wait until the session has sent at least `count` frames.
    pub async fn wait_for_sent(&self, count: usize) {
        let mut rx = self.shared.sent_count.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}
