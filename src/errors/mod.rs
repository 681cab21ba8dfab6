pub mod session_error;

pub use session_error::{CloseReason, ErrorKind, SessionError, SessionResult};
