//! devlink-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does devlink-client do? (for beginners)
//!
//! The client is the unprivileged side.  It:
//!
//! 1. Browses mDNS for a device that is showing a pairing code.
//! 2. Pairs: both sides prove knowledge of the code through a PAKE, then swap
//!    identities over an AES-GCM channel keyed from that exchange.
//! 3. Later connects to the device's session port, signs its challenge with
//!    the stored Ed25519 identity, and runs commands over multiplexed streams.
//! 4. Separately, writes the shared token file and drives the local
//!    privileged worker that injects taps, swipes, keys and text.

/// Application layer: pairing, connect, and injection use cases.
pub mod application;

/// Infrastructure layer: discovery, sockets, key store, and config files.
pub mod infrastructure;
