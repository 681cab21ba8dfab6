pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use events::{
    EventBus, EventKind, Party, PublishReport, SessionEvent, SubscriptionToken,
};
pub use protocol::{CodecError, ControlAction, FrameTag, Message};
pub use session::{
    ConnectionStatus, SessionMachine, SessionSnapshot, SessionState, Speaker, Turn, VoiceSession,
};
pub use transport::{
    LoopbackTransport, RemotePeer, SharedTransport, Transport, TransportError, TransportEvent,
    TransportHandle, WebSocketTransport,
};
