//! Byte-level framing for the three channels: pairing packets, wire-protocol
//! session frames, and privileged-channel frames.

pub mod pairing;
pub mod privileged;
pub mod wire;

pub use pairing::{PairingFrameError, PairingPacketHeader, PairingPacketType, PeerInfo, PeerInfoKind};
pub use privileged::{InputCommand, PathPoint, PrivilegedError, Reply, ReplyType, Request, RequestType};
pub use wire::{decode_message, parse_header, parse_message, AuthKind, Command, WireError, WireHeader, WireMessage};
