//! Byte-stream transports.
//!
//! The session layer talks to the network only through the [`Transport`] and
//! [`TransportHandle`] traits. Two implementations ship with the crate:
//!
//! - [`WebSocketTransport`] - tokio-tungstenite client (ws:// and wss://)
//! - [`LoopbackTransport`] - in-process pair, driven by a [`RemotePeer`]

mod base;
pub mod loopback;
pub mod websocket;

pub use base::{
    SharedTransport, Transport, TransportError, TransportEvent, TransportHandle, TransportResult,
};
pub use loopback::{LoopbackTransport, RemotePeer};
pub use websocket::WebSocketTransport;
