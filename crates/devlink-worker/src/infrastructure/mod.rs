//! Infrastructure layer for the worker.
//!
//! - **`startup`** – Validates `--data-dir`/`--socket-name` and loads the token.
//! - **`server`** – Unix-socket accept loop and per-connection frame handling.
//! - **`injector`** – `InputInjector` implementations.

pub mod injector;
pub mod server;
pub mod startup;
