//! Protocol state machines, kept free of I/O so they can be tested directly.

pub mod session;
pub mod stream;

pub use session::{Admission, ChannelState, PrivilegedSession, MAX_AUTH_FAILURES};
pub use stream::{ProtocolViolation, StreamEvent, StreamState, StreamTable};
