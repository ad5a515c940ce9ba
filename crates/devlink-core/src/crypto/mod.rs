//! Cryptographic building blocks: curve encoding, SPAKE2, the pairing channel
//! cipher, and auth-token comparison.

pub mod channel;
pub mod curve;
pub mod spake2;
pub mod token;

pub use channel::{ChannelError, PairingCipher};
pub use curve::CurveError;
