//! Application layer use cases for the client.
//!
//! # What use cases does the client have?
//!
//! - **`pair_device`** – Finds the device's pairing service and runs the
//!   code-authenticated exchange that makes the device trust our key.
//!
//! - **`connect_device`** – Finds the session service, connects with the
//!   stored identity, and runs shell commands over a logical stream.
//!
//! - **`inject_input`** – Builds tap, key, text and swipe commands and hands
//!   them to the privileged worker over its local socket.
//!
//! All three report failures as an [`attempt::AttemptError`], whose class
//! decides retry behaviour and whose user message stays generic.

pub mod attempt;
pub mod connect_device;
pub mod inject_input;
pub mod pair_device;
