//! # devlink-core
//!
//! Shared library for devlink containing the binary codecs, the PAKE
//! handshake, the pairing channel cipher, and the protocol state machines.
//!
//! This crate is used by both the client and the privileged worker.
//! It has zero dependencies on OS APIs or network sockets: every function
//! here operates on byte slices and plain values so it can be tested without
//! a device on the other end.
//!
//! # Architecture overview (for beginners)
//!
//! devlink talks to a device's debug daemon in three phases:
//!
//! 1. **Pairing.**  The user reads a short code off the device screen.  Both
//!    sides turn that code into a strong shared key with a PAKE
//!    (password-authenticated key exchange) and then swap identities over an
//!    encrypted channel.
//!
//! 2. **Wire session.**  Once paired, the client connects to the daemon's
//!    session port and proves its identity by signing a challenge.  Logical
//!    streams (shell commands, services) are multiplexed over the one socket.
//!
//! 3. **Privileged channel.**  Separately, a local worker running with
//!    elevated privileges accepts input-injection commands over a local
//!    socket, authenticated by a shared token file.
//!
//! This crate defines:
//!
//! - **`crypto`** – The P-256 SPAKE2 handshake, the AES-GCM pairing channel
//!   cipher with per-direction nonces, and the auth-token comparison.
//!
//! - **`protocol`** – Byte layouts for the pairing packets, the 24-byte-header
//!   wire protocol, and the privileged-channel frames.
//!
//! - **`domain`** – Pure state machines: the wire protocol's stream table and
//!   the privileged channel's authentication session.

pub mod crypto;
pub mod domain;
pub mod error;
pub mod protocol;

pub use crypto::spake2::{PakeError, PakeRole, SharedSecret, Spake2};
pub use crypto::token::{constant_time_eq, AuthToken, TOKEN_LEN};
pub use domain::session::{Admission, ChannelState, PrivilegedSession};
pub use domain::stream::{ProtocolViolation, StreamEvent, StreamTable};
pub use error::ErrorClass;
pub use protocol::wire::{Command, WireError, WireHeader, WireMessage};
