//! Application layer use cases for the worker.
//!
//! - **`inject_input`** – Runs admitted `TAP`/`MOTION`/`KEY`/`TEXT`/`BATCH`
//!   requests through an `InputInjector` chosen at startup, and turns the
//!   outcome into a reply.

pub mod inject_input;
