//! devlink-worker library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does devlink-worker do? (for beginners)
//!
//! Injecting taps and key presses needs more privilege than an ordinary app
//! process has.  The worker is a small process started with that privilege.
//! It does one thing: listen on a local Unix socket and turn authenticated
//! requests into input events.
//!
//! 1. At startup it loads the 32-byte token the client wrote into the data
//!    directory.  Without an explicit data directory, socket name and token
//!    file it refuses to start.
//! 2. Each connection must send `AUTH` with that token before anything else.
//!    Anything else first gets `REJECTED` and the connection is closed; three
//!    wrong tokens also close it.
//! 3. Authenticated connections may send `TAP`, `MOTION`, `KEY`, `TEXT`,
//!    `BATCH`, `STATUS`, and finally `SHUTDOWN`, which stops the worker.

/// Application layer: the input-injection use case and its platform seam.
pub mod application;

/// Infrastructure layer: startup checks, the socket server, and injectors.
pub mod infrastructure;
